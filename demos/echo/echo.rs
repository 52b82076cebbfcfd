//! A minimal FastCGI responder: echoes the request method, query string and any POST
//! fields it was handed back as `text/plain`.
//!
//! Run it behind a FastCGI-speaking web server (the listening socket is inherited on FD 0),
//! or point it at a Unix socket path via argv[1] for local testing.

use fastcgi_runtime::encode::TextEncoding;
use fastcgi_runtime::http::multipart::Part;
use fastcgi_runtime::request::RequestContext;
use fastcgi_runtime::{Config, Handler, Manager};
use std::sync::Arc;

struct Echo;

impl Handler for Echo {
    fn response(&mut self, ctx: &mut RequestContext) -> anyhow::Result<bool> {
        ctx.stdout.set_encoding(TextEncoding::None);
        ctx.stdout.write_str("Content-Type: text/plain\r\n\r\n");
        ctx.stdout
            .write_str(&format!("method: {}\n", ctx.env.request_method));
        ctx.stdout
            .write_str(&format!("query: {}\n", ctx.env.query_string));
        for (key, value) in ctx.env.query().iter() {
            ctx.stdout.write_str(&format!("query[{key}] = {value}\n"));
        }
        for (key, value) in ctx.posts.iter() {
            ctx.stdout.write_str(&format!("post[{key}] = {value}\n"));
        }
        for file in &ctx.files {
            if let Part::File { name, filename, .. } = file {
                ctx.stdout.write_str(&format!("file[{name}] = {filename}\n"));
            }
        }
        Ok(true)
    }
}

fn main() -> anyhow::Result<()> {
    fastcgi_runtime::logging::init_stderr(log::LevelFilter::Info);

    let manager = Manager::new(Config::new(), Arc::new(|| Echo))?;
    match std::env::args().nth(1) {
        Some(path) => {
            let listener = std::os::unix::net::UnixListener::bind(&path)?;
            listener.set_nonblocking(true)?;
            manager.listen_unix(mio::net::UnixListener::from_std(listener))?;
            log::info!("listening on {path}");
        }
        None => {
            manager.listen_inherited()?;
            log::info!("listening on inherited FastCGI socket");
        }
    }

    manager.start();
    manager.join();
    Ok(())
}
