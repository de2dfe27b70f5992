#![allow(dead_code)]
pub mod logs;
pub mod scripted;
