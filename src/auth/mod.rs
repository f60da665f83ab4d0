pub mod token;

pub use token::{
    auth_cookie, clear_auth_cookie, extract_token, Claims, TokenService, UserProfile,
};
