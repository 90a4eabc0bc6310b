// tests/common/mod.rs

//! Shared fixtures: zip-built update packages and manifest XML

use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;

/// Minimal component manifest for a package with no dependencies
pub fn mum_xml(name: &str, version: &str, arch: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v3">
  <assemblyIdentity name="{name}" version="{version}"
      processorArchitecture="{arch}" language="neutral"
      publicKeyToken="31bf3856ad364e35"/>
  <package identifier="{name}" releaseType="Update"/>
</assembly>
"#
    )
}

/// Manifest declaring one dependency
pub fn mum_xml_with_dependency(
    name: &str,
    version: &str,
    dep_name: &str,
    dep_version: &str,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v3">
  <assemblyIdentity name="{name}" version="{version}"
      processorArchitecture="neutral" language="neutral"
      publicKeyToken="31bf3856ad364e35"/>
  <package identifier="{name}" releaseType="Update">
    <dependencies>
      <dependency>
        <assemblyIdentity name="{dep_name}" version="{dep_version}"
            processorArchitecture="neutral" language="neutral"
            publicKeyToken="31bf3856ad364e35"/>
      </dependency>
    </dependencies>
  </package>
</assembly>
"#
    )
}

/// Build a zip-container update package from (entry name, content) pairs
pub fn build_package(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).expect("create package file");
    let mut writer = zip::ZipWriter::new(file);
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(content).expect("write zip entry");
    }
    writer.finish().expect("finish package");
}
