pub mod basic;
pub mod erp;
pub mod health;
