pub mod blueprints;
pub mod health;
