pub(crate) mod site;
pub(crate) mod sync;
