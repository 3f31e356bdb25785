pub mod logging;
pub mod sync;
#[cfg(test)]
pub mod test_utils;
pub mod url;
