pub mod entities;
pub mod errors;
pub mod socket_io;
pub mod value_objects;
