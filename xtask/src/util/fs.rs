pub use fs_err::*;
use std::io;
use std::path::Path;

pub(crate) fn remove_dir_all_if_exists(path: &Path) -> io::Result<()> {
    let result = fs_err::remove_dir_all(path);

    if matches!(&result, Err(err) if err.kind() == io::ErrorKind::NotFound) {
        return Ok(());
    }

    result
}
