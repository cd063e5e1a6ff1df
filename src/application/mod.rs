pub mod builders;
pub mod duplex;
pub mod services;
pub mod session;
