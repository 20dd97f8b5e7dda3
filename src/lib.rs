pub mod lightning;
pub mod logging;
pub mod lsps1;
