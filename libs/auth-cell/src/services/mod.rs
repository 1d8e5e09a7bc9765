pub mod account;
pub mod otp;
pub mod password;
pub mod policy;
pub mod validation;

pub use account::AccountService;
