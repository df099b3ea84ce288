pub mod ai;
pub mod api;
pub mod attempts;
pub mod auth;
pub mod chat;
pub mod classes;
pub mod config;
pub mod db;
pub mod error;
pub mod materials;
pub mod quizzes;
pub mod storage;
pub mod users;
pub mod utils;
