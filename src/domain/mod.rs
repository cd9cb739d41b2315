//! Domain layer: the merchant aggregate, its satellites, the transition
//! rules and the ports the application layer talks to.

pub mod address;
pub mod document;
pub mod effects;
pub mod employee;
pub mod merchant;
pub mod ports;
pub mod rules;
pub mod validation;
