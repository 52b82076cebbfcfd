//! `multipart/form-data` body parser, spec §4.4.
//!
//! A byte-level scanner ported from the HEADER/NAME/FILENAME/CONTENT_TYPE/BODY state
//! machine in `examples/original_source/src/http.cpp`'s `Form::parse`, generalized to
//! return owned parts instead of appending directly into a caller-provided multimap.

/// One parsed multipart section: a plain field or an uploaded file.
#[derive(Debug, Clone)]
pub enum Part {
    Field { name: String, value: Vec<u8> },
    File {
        name: String,
        filename: String,
        content_type: String,
        data: Vec<u8>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Name,
    Filename,
    ContentType,
    Body,
}

/// Parses a `multipart/form-data` body delimited by `boundary` (the value already extracted
/// from the `Content-Type` header, without the leading `--`).
pub fn parse(body: &[u8], boundary: &str) -> Vec<Part> {
    let delim = format!("--{boundary}");
    let delim = delim.as_bytes();

    let mut parts = Vec::new();
    let mut pos = 0;
    // Skip to the first boundary.
    pos = match find(body, delim, pos) {
        Some(p) => p + delim.len(),
        None => return parts,
    };

    loop {
        // A trailing "--" after the boundary marks the end of the body.
        if body[pos..].starts_with(b"--") {
            break;
        }
        // Skip the CRLF after the boundary line.
        if body[pos..].starts_with(b"\r\n") {
            pos += 2;
        }

        let mut state = State::Header;
        let mut name = String::new();
        let mut filename = String::new();
        let mut content_type = String::new();
        let mut body_start = pos;

        while pos < body.len() {
            match state {
                State::Header => {
                    if body[pos..].starts_with(b"\r\n\r\n") {
                        pos += 4;
                        body_start = pos;
                        state = State::Body;
                        continue;
                    }
                    if body[pos..].starts_with(b"name=\"") {
                        pos += 6;
                        state = State::Name;
                        continue;
                    }
                    if body[pos..].starts_with(b"filename=\"") {
                        pos += 10;
                        state = State::Filename;
                        continue;
                    }
                    if body[pos..].starts_with(b"Content-Type: ") {
                        pos += 14;
                        state = State::ContentType;
                        continue;
                    }
                    pos += 1;
                }
                State::Name => match body[pos..].iter().position(|&b| b == b'"') {
                    Some(rel) => {
                        name = String::from_utf8_lossy(&body[pos..pos + rel]).into_owned();
                        pos += rel + 1;
                        state = State::Header;
                    }
                    None => break,
                },
                State::Filename => match body[pos..].iter().position(|&b| b == b'"') {
                    Some(rel) => {
                        filename = String::from_utf8_lossy(&body[pos..pos + rel]).into_owned();
                        pos += rel + 1;
                        state = State::Header;
                    }
                    None => break,
                },
                State::ContentType => match body[pos..].iter().position(|&b| b == b'\r' || b == b'\n') {
                    Some(rel) => {
                        content_type = String::from_utf8_lossy(&body[pos..pos + rel]).into_owned();
                        pos += rel;
                        state = State::Header;
                    }
                    None => break,
                },
                State::Body => {
                    let Some(rel) = find(&body[pos..], delim, 0) else {
                        pos = body.len();
                        break;
                    };
                    let mut end = pos + rel;
                    // The boundary is always preceded by a CRLF that belongs to the
                    // delimiter line, not the part body; trim it if present.
                    let trimmed_end = if end >= body_start + 2 && &body[end - 2..end] == b"\r\n" {
                        end - 2
                    } else {
                        end
                    };
                    let data = body[body_start..trimmed_end].to_vec();
                    if !name.is_empty() && !filename.is_empty() {
                        parts.push(Part::File {
                            name,
                            filename,
                            content_type,
                            data,
                        });
                    } else if !name.is_empty() {
                        parts.push(Part::Field { name, value: data });
                    }
                    end += delim.len();
                    pos = end;
                    break;
                }
            }
        }
        if pos >= body.len() {
            break;
        }
    }
    parts
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
