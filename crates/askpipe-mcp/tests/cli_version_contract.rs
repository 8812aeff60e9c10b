#[test]
fn askpipe_version_contract() {
    let bin = assert_cmd::cargo::cargo_bin!("askpipe");
    let out = std::process::Command::new(bin)
        .args(["version"])
        .output()
        .expect("run askpipe version");

    assert!(out.status.success(), "askpipe version failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse version json");

    assert_eq!(v["name"].as_str(), Some("askpipe"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());
}
