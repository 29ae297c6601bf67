pub mod text;

pub use text::{mask_api_key, safe_truncate};
