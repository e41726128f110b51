#![allow(dead_code)]

pub mod fixtures;
pub mod mock_drive_client;
