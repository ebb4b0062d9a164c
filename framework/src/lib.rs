pub mod api;
pub mod assemble;
pub mod attachments;
pub mod config;
pub mod error;
pub mod mail;
mod serve;

pub use api::{router, Context};
pub use config::EnvConfig;
pub use error::{Error, Result};
pub use serve::{serve, shutdown_signal};

#[macro_export]
macro_rules! anyhow_from {
    ($error_type:path) => {
        impl From<$error_type> for Error {
            fn from(err: $error_type) -> Self {
                Error::from(anyhow::Error::new(err))
            }
        }
    };
}
