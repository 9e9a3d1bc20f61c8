pub mod analysis;
pub mod codegen;
pub mod common;
pub mod driver;
pub mod ir;
pub mod opt;
pub mod pipeline;
