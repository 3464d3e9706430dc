pub mod bouncer;
pub mod hashing;
pub mod inode_store;
pub mod permissions;
