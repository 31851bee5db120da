/// Decodes a fixed 16-byte name field such as `segname` or `sectname`.
pub fn fixed_name(bytes: &[u8; 16]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Drops control characters, which pad the trailing strings of some commands.
pub fn trim_control(string: &str) -> String {
    string.chars().filter(|c| !c.is_control()).collect()
}

/// `/usr/lib/libSystem.B.dylib` -> `libSystem.B.dylib`
pub fn last_path_component(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Formats an `xxxx.yy.zz` packed version.
pub fn version_string(version: u32) -> String {
    format!(
        "{}.{}.{}",
        (version >> 16) & 0xffff,
        (version >> 8) & 0xff,
        version & 0xff
    )
}

/// Formats an `a.b.c.d.e` source version packed as 24.10.10.10.10 bits.
pub fn source_version_string(version: u64) -> String {
    let [e, d, c, b, a] = crate::bits::split(version, [10, 10, 10, 10, 24]);
    format!("{}.{}.{}.{}.{}", a, b, c, d, e)
}
