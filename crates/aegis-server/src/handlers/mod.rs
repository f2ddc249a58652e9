//! Request handlers

pub mod admin;
pub mod auth;
pub mod files;
pub mod folders;
pub mod health;
pub mod rooms;
pub mod rotation;
pub mod shares;
