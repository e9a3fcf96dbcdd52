#[cfg(feature = "provider-fal")]
pub mod fal;
#[cfg(feature = "provider-google")]
pub mod google;
#[cfg(feature = "provider-replicate")]
pub mod replicate;

#[cfg(feature = "provider-fal")]
pub use fal::Fal;
#[cfg(feature = "provider-google")]
pub use google::GoogleImagen;
#[cfg(feature = "provider-replicate")]
pub use replicate::Replicate;
