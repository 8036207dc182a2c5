use std::io;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::protocol::{INVALID_REQUEST, JsonRpcResponse, PARSE_ERROR, parse_request};
use crate::server::McpServer;

/// Largest `Content-Length` body accepted on stdio, matching axum's default
/// request body limit.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StdioFrame {
    LineDelimited,
    ContentLength,
}

/// Serves one client on the process's stdin/stdout until EOF.
pub async fn serve_stdio(server: &McpServer) -> io::Result<()> {
    info!("serving MCP over stdio");
    serve(server, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Reads line-delimited or `Content-Length` framed requests and answers each
/// in the framing it arrived in.
pub async fn serve<R, W>(server: &McpServer, mut reader: R, mut writer: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            debug!("stdin closed");
            break;
        }

        let trimmed = line.trim_end_matches(['\r', '\n']).trim_start();
        if trimmed.is_empty() {
            continue;
        }

        let (payload, frame) = if is_header_line(trimmed) {
            let content_length = match read_content_length(&mut reader, trimmed).await {
                Ok(v) => v,
                Err(err) => {
                    let response = JsonRpcResponse::error(
                        Value::Null,
                        PARSE_ERROR,
                        format!("invalid stdio frame: {err}"),
                    );
                    write_response(&mut writer, &response, StdioFrame::ContentLength).await?;
                    continue;
                }
            };
            if content_length > MAX_FRAME_BYTES {
                // The oversized body is never read, so framing cannot be recovered.
                warn!(content_length, "stdio frame exceeds limit, closing session");
                let response = JsonRpcResponse::error(
                    Value::Null,
                    INVALID_REQUEST,
                    format!(
                        "frame of {content_length} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
                    ),
                );
                write_response(&mut writer, &response, StdioFrame::ContentLength).await?;
                break;
            }
            let mut body = vec![0_u8; content_length];
            reader.read_exact(&mut body).await?;
            (body, StdioFrame::ContentLength)
        } else {
            (trimmed.as_bytes().to_vec(), StdioFrame::LineDelimited)
        };

        let request = match parse_request(&payload) {
            Ok(request) => request,
            Err(response) => {
                write_response(&mut writer, &response, frame).await?;
                continue;
            }
        };
        if let Some(response) = server.handle_request(request).await {
            write_response(&mut writer, &response, frame).await?;
        }
    }
    Ok(())
}

async fn write_response<W>(
    writer: &mut W,
    response: &JsonRpcResponse,
    frame: StdioFrame,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let serialized = serde_json::to_vec(response)?;
    match frame {
        StdioFrame::LineDelimited => {
            writer.write_all(&serialized).await?;
            writer.write_all(b"\n").await?;
        }
        StdioFrame::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", serialized.len());
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&serialized).await?;
        }
    }
    writer.flush().await
}

fn is_header_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.starts_with("content-length:") || lower.starts_with("content-type:")
}

async fn read_content_length<R>(reader: &mut R, first_line: &str) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length = parse_content_length(first_line);
    let mut header_line = String::new();
    loop {
        header_line.clear();
        if reader.read_line(&mut header_line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected eof while reading frame headers",
            ));
        }
        let trimmed = header_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(v) = parse_content_length(trimmed) {
            content_length = Some(v);
        }
    }
    content_length
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing content-length header"))
}

fn parse_content_length(line: &str) -> Option<usize> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse::<usize>().ok()
}
