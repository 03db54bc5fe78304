use std::fs;
use std::io::Write;
use std::path::Path;

fn main() {
    let out_dir = std::env::var("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("migrations.rs");

    // migrations 目录变化时重新编译
    println!("cargo:rerun-if-changed=migrations/");

    let mut files: Vec<_> = fs::read_dir("migrations")
        .expect("无法读取 migrations 目录")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".sql"))
        .collect();
    files.sort_by_key(|e| e.file_name());

    let entries: Vec<String> = files
        .iter()
        .map(|entry| {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let name = file_name.trim_end_matches(".sql").to_string();
            format!(
                "    (\"{name}\", include_str!(concat!(env!(\"CARGO_MANIFEST_DIR\"), \"/migrations/{file_name}\")))",
            )
        })
        .collect();

    let mut f = fs::File::create(&dest_path).expect("无法创建 migrations.rs");
    writeln!(
        f,
        "/// 编译时自动扫描 migrations/ 目录生成\n\
         pub const MIGRATIONS: &[(&str, &str)] = &[\n{}\n];",
        entries.join(",\n")
    )
    .expect("无法写入 migrations.rs");
}
