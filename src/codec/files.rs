//! Naming, discovery and pre-allocation of the files a conversion produces.

use std::{
    ffi::OsString,
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

const CHANNEL_MARKER: &str = "_ch";
const CHANNEL_EXTENSION: &str = "raw";
const DECODED_SUFFIX: &str = "_modified.wav";

/// `<input without extension>_ch<N>.raw`, `channel` counts from 0 but file numbers from 1
pub fn channel_file_name<P: AsRef<Path>>(input: P, channel: usize) -> PathBuf {
    with_suffix(&input.as_ref().with_extension(""), &channel_suffix(channel))
}

/// # Description
/// Finds the channel files of an encoded image set, in channel order.
/// ## Comments
/// - `name` may be the base name (`song`), the source file (`song.wav`) or any channel file
/// (`song_ch2.raw`)
/// - stops at the first missing number, so `song_ch1.raw, song_ch3.raw` yields only the first
pub fn find_channel_files<P: AsRef<Path>>(name: P) -> Vec<PathBuf> {
    base_candidates(name.as_ref())
        .into_iter()
        .map(|base| {
            (0..)
                .map(|channel| with_suffix(&base, &channel_suffix(channel)))
                .take_while(|path| path.is_file())
                .collect::<Vec<_>>()
        })
        .find(|files| !files.is_empty())
        .unwrap_or_default()
}

/// `<base>_modified.wav` where `base` is `channel_file` up to its `_ch` marker
pub fn decoded_file_name<P: AsRef<Path>>(channel_file: P) -> PathBuf {
    let channel_file = channel_file.as_ref();
    let base =
        strip_channel_marker(channel_file).unwrap_or_else(|| channel_file.with_extension(""));
    with_suffix(&base, DECODED_SUFFIX)
}

/// # Description
/// Creates `path` at its final size before any sample is computed.
/// ## Comments
/// - fails with [`Error::OutputExists`] unless `overwrite` is set
/// - a full disk shows up here instead of halfway through a conversion
pub fn preallocate<P: AsRef<Path>>(path: P, len: u64, overwrite: bool) -> Result<File> {
    let path = path.as_ref();
    if !overwrite && path.exists() {
        return Err(Error::OutputExists(path.to_path_buf()));
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(len)?;
    log::debug!("pre-allocated {} bytes for {}", len, path.display());
    Ok(file)
}

fn channel_suffix(channel: usize) -> String {
    format!("{}{}.{}", CHANNEL_MARKER, channel + 1, CHANNEL_EXTENSION)
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn strip_channel_marker(path: &Path) -> Option<PathBuf> {
    let name = path.to_str()?;
    let file_start = name.len() - path.file_name()?.len();
    let marker = name[file_start..].rfind(CHANNEL_MARKER)? + file_start;
    Some(PathBuf::from(&name[..marker]))
}

fn base_candidates(name: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![name.to_path_buf()];
    if let Some(stripped) = strip_channel_marker(name) {
        candidates.push(stripped);
    }
    if name.extension().is_some() {
        candidates.push(name.with_extension(""));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn channel_files_replace_the_extension() {
        assert_eq!(
            PathBuf::from("music/song_ch1.raw"),
            channel_file_name("music/song.wav", 0)
        );
        assert_eq!(PathBuf::from("song_ch2.raw"), channel_file_name("song", 1));
    }

    #[test]
    fn decoded_name_drops_the_channel_marker() {
        assert_eq!(
            PathBuf::from("music/song_modified.wav"),
            decoded_file_name("music/song_ch1.raw")
        );
        assert_eq!(
            PathBuf::from("my_choir_modified.wav"),
            decoded_file_name("my_choir_ch1.raw")
        );
        // a directory named like a channel file is left alone
        assert_eq!(
            PathBuf::from("a_ch1/b_modified.wav"),
            decoded_file_name("a_ch1/b.raw")
        );
    }

    #[test]
    fn discovery_accepts_base_source_or_channel_names() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("song");
        for channel in 0..2 {
            fs::write(channel_file_name(dir.path().join("song.wav"), channel), b"x").unwrap();
        }
        // a gap ends the set
        fs::write(with_suffix(&base, "_ch4.raw"), b"x").unwrap();

        let expected = vec![
            with_suffix(&base, "_ch1.raw"),
            with_suffix(&base, "_ch2.raw"),
        ];
        assert_eq!(expected, find_channel_files(&base));
        assert_eq!(expected, find_channel_files(dir.path().join("song.wav")));
        assert_eq!(expected, find_channel_files(dir.path().join("song_ch2.raw")));
        assert!(find_channel_files(dir.path().join("other")).is_empty());
    }

    #[test]
    fn preallocation_sizes_file_and_guards_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.raw");

        let file = preallocate(&path, 12_345, false).unwrap();
        drop(file);
        assert_eq!(12_345, fs::metadata(&path).unwrap().len());

        assert!(matches!(
            preallocate(&path, 10, false),
            Err(Error::OutputExists(_))
        ));
        preallocate(&path, 10, true).unwrap();
        assert_eq!(10, fs::metadata(&path).unwrap().len());
    }
}
