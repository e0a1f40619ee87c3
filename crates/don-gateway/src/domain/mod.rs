//! Domain layer: configuration, errors and callback correlation.

pub mod callback;
pub mod callback_store;
pub mod config;
pub mod error;

pub use callback::{callback, Callback, CallbackError, CallbackWaiter, UserCallbackPayload};
pub use callback_store::{cleanup_task, CallbackStats, CallbackStore};
pub use config::{
    ConfigError, DonConfig, GatewayConfig, NodeConfig, PassThroughConfig, ServiceConfig,
};
pub use error::{CodecError, DonError, GatewayError, HandlerError};
