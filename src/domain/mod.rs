// Domain layer: core models, the read-query surface and ports (interfaces).

pub mod model;
pub mod ports;
pub mod query;
