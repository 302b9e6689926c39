pub mod pagination;
pub mod password;
pub mod token;
pub mod upload;
