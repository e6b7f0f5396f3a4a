pub mod blink;
pub mod camera_service;
pub mod config;
pub mod fetcher;
pub mod state;
pub mod window;
