mod service;
mod transport;

pub use {service::*, transport::*};
