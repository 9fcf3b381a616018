pub(crate) mod analyze;
pub(crate) mod clusters;
pub(crate) mod helpers;
pub(crate) mod parse;
