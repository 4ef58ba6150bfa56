mod data_type;
mod pipeline;
mod register_type;
mod spec;
mod value;

pub use data_type::DataType;
pub use pipeline::{
    Access, BitOp, BoundSource, DependsOn, FlagEntry, MapEntry, SwapMode, SymbolicConfig,
    TextEncoding,
};
pub use register_type::RegisterType;
pub use spec::RegisterSpec;
pub use value::{EntityValue, Value};
