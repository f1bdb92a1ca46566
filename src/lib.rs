pub mod announce;
pub mod chat;
pub mod ci;
pub mod commands;
pub mod config;
pub mod contributors;
pub mod db;
pub mod handlers;
pub mod model;
pub mod quality;
pub mod reconciler;
pub mod servers;
pub mod testmerge;
pub mod webhook;
