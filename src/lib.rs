pub mod config;
pub mod irc;
pub mod web;
