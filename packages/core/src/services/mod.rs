pub mod mock_platform;
pub mod platform;
