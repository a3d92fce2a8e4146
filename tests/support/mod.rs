pub mod pages;
pub mod socket_guard;
