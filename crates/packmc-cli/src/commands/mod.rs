pub mod casino;
pub mod preview;
