mod status;

pub use status::{StatusRow, collect_status, print_status};
