pub(crate) mod bridge;
pub(crate) mod failure;
pub(crate) mod handles;
pub(crate) mod limits;
pub(crate) mod marshal;
