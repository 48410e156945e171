//! Background task spawning shared by the staging pipeline (§4.4/§5).
mod spawn;

pub(crate) use spawn::spawn;
