#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let usage = "usage: kaleido-server [--config PATH] [--dotenv PATH] [--listen|--addr HOST:PORT] [--provider fal|replicate|google] [--json-logs]";

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<std::path::PathBuf> = None;
    let mut dotenv_path: Option<std::path::PathBuf> = None;
    let mut listen: Option<String> = None;
    let mut provider: Option<kaleido::ProviderId> = None;
    let mut json_logs = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(args.next().ok_or("missing value for --config")?.into());
            }
            "--dotenv" => {
                dotenv_path = Some(args.next().ok_or("missing value for --dotenv")?.into());
            }
            "--listen" | "--addr" => {
                listen = Some(args.next().ok_or("missing value for --listen/--addr")?);
            }
            "--provider" => {
                let raw = args.next().ok_or("missing value for --provider")?;
                provider = Some(raw.parse::<kaleido::ProviderId>()?);
            }
            "--json-logs" => {
                json_logs = true;
            }
            "--help" | "-h" => {
                println!("{usage}");
                return Ok(());
            }
            other => return Err(format!("unknown arg: {other}\n{usage}").into()),
        }
    }

    let mut config = match config_path {
        Some(path) => kaleido::ServerConfig::load(path)?,
        None => kaleido::ServerConfig::default(),
    };
    if let Some(provider) = provider {
        config.default_provider = Some(provider);
    }
    if json_logs {
        config.json_logs = true;
    }

    let env = match dotenv_path {
        Some(path) => kaleido::Env::from_dotenv_file(path)?,
        None => match kaleido::Env::from_dotenv_file(".env") {
            Ok(env) => env,
            Err(_) => kaleido::Env::default(),
        },
    };

    let listen = listen
        .or_else(|| config.listen.clone())
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());

    let registry = kaleido::ProviderRegistry::builtin();
    let state = kaleido::server::ServerState::from_env_with_config(registry, &env, &config);

    let app = kaleido::server::router(state);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    println!("kaleido-server listening on {listen}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(not(feature = "server"))]
fn main() {
    eprintln!("kaleido-server requires `--features server`");
    std::process::exit(1);
}
