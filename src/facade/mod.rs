pub mod factory;

pub use factory::SessionFactory;
