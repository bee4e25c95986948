use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Reads a whole UTF-8 text file.
///
/// I/O failures and invalid UTF-8 are reported as different errors.
pub(crate) fn read_text<P: AsRef<Path>>(filename: P) -> Result<String> {
	let path = filename.as_ref();
	let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
	String::from_utf8(bytes).map_err(|source| Error::Decode { path: path.to_owned(), source })
}

/// Reads a text file and returns its lines with their terminators kept.
///
/// - `"a\nb"` → `["a\n", "b"]`
/// - Concatenating the result gives back the file contents
pub(crate) fn read_lines<P: AsRef<Path>>(filename: P) -> Result<Vec<String>> {
	let contents = read_text(filename)?;
	Ok(contents.split_inclusive('\n').map(str::to_owned).collect())
}

/// Writes `contents` verbatim, replacing any existing file.
pub fn write_text<P: AsRef<Path>>(filename: P, contents: &str) -> Result<()> {
	let path = filename.as_ref();
	fs::write(path, contents).map_err(|e| Error::io(path, e))
}

/// Builds an output path based on an input path and a new extension.
///
/// Example:
/// `data/input.txt` + `"bin"` → `data/input.bin`
pub(crate) fn build_output_path<P: AsRef<Path>>(input_path: P, output_extension: &str) -> Result<PathBuf> {
	let input_path = input_path.as_ref();

	let parent = input_path.parent().unwrap_or_else(|| Path::new("."));
	let file_stem = input_path.file_stem().ok_or_else(|| {
		Error::io(input_path, io::Error::new(io::ErrorKind::InvalidInput, "Input path has no filename"))
	})?;

	let mut output = PathBuf::from(parent);
	output.push(file_stem);
	output.set_extension(output_extension);

	Ok(output)
}
