pub mod audit;
pub mod rbac;
pub mod resource;
pub mod user;
