//! Cell data and the packages that carry it between patches.
pub mod fab;
pub mod package;
pub mod package_pool;
pub mod package_queue;

pub use fab::Fab;
pub use package::Package;
pub use package_pool::PackagePool;
pub use package_queue::PackageQueue;
