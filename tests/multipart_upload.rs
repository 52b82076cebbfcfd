//! Spec §8 scenario 3: a multipart body carrying two text fields and one binary file,
//! parsed byte-for-byte.

use fastcgi_runtime::http::multipart::{parse, Part};
use fastcgi_runtime::http::split_content_type;

const PNG_SIZE: usize = 58587;

/// Deterministic filler standing in for a real PNG's bytes; the parser only cares about
/// exact byte-for-byte reproduction through the body, not about image validity.
fn png_fixture_bytes() -> Vec<u8> {
    let mut state: u64 = 0x706e675f66697874;
    let mut out = Vec::with_capacity(PNG_SIZE);
    for _ in 0..PNG_SIZE {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        out.push((state >> 56) as u8);
    }
    out
}

#[test]
fn multipart_body_yields_exact_file_and_two_fields() {
    let boundary = "----WebKitFormBoundary7MA4YWxkTrZu0gW";
    let png = png_fixture_bytes();

    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"title\"\r\n\r\n");
    body.extend_from_slice(b"a gnu\r\n");
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"caption\"\r\n\r\n");
    body.extend_from_slice(b"free as in freedom\r\n");
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"aFile\"; filename=\"gnu.png\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(&png);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--").as_bytes());

    let content_type = format!("multipart/form-data; boundary=\"{boundary}\"");
    let (bare, parsed_boundary) = split_content_type(&content_type);
    assert_eq!(bare, "multipart/form-data");
    let parsed_boundary = parsed_boundary.unwrap();

    let parts = parse(&body, parsed_boundary);
    assert_eq!(parts.len(), 3);

    let mut posts = Vec::new();
    let mut file = None;
    for part in parts {
        match part {
            Part::Field { name, value } => posts.push((name, value)),
            Part::File { name, filename, content_type, data } => {
                file = Some((name, filename, content_type, data));
            }
        }
    }

    assert_eq!(posts[0], ("title".to_string(), b"a gnu".to_vec()));
    assert_eq!(posts[1], ("caption".to_string(), b"free as in freedom".to_vec()));

    let (name, filename, content_type, data) = file.expect("expected a file part");
    assert_eq!(name, "aFile");
    assert_eq!(filename, "gnu.png");
    assert_eq!(content_type, "image/png");
    assert_eq!(data.len(), PNG_SIZE);
    assert_eq!(data, png);
}
