//! Default functions for serde defaults in CRD specs.

pub fn replicas() -> i32 {
    crate::constants::defaults::REPLICAS
}
