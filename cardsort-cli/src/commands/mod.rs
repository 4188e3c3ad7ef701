pub mod identify;
pub mod organize;
pub mod route;
pub mod update;
