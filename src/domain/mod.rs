// Domain layer: resolved deployment names, artifacts and the ports templates and storage plug into.

pub mod model;
pub mod ports;
