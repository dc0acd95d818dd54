//! A scripted plaintext SMTP peer for integration tests.

use std::net::SocketAddr;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};

/// Knobs for one mock session.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Greeting code; anything but 220 makes the client bail out.
    pub greeting_code: u16,
    /// Advertise and accept AUTH PLAIN.
    pub offer_auth: bool,
    /// Recipients answered with 550.
    pub reject_recipients: Vec<String>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            greeting_code: 220,
            offer_auth: false,
            reject_recipients: Vec::new(),
        }
    }
}

/// What the peer observed: command lines plus the raw DATA payload as it
/// arrived on the wire (dot-stuffing intact, terminating dot excluded).
#[derive(Debug, Default)]
pub struct Transcript {
    pub commands: Vec<String>,
    pub data: Vec<u8>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    handle: JoinHandle<Transcript>,
}

impl MockServer {
    /// Binds an ephemeral port and serves exactly one session.
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(serve(listener, behavior));
        Self { addr, handle }
    }

    /// Waits for the session to end and returns what the peer saw.
    pub async fn finish(self) -> Transcript {
        self.handle.await.unwrap()
    }
}

async fn serve(listener: TcpListener, behavior: Behavior) -> Transcript {
    let (socket, _) = listener.accept().await.unwrap();
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read);
    let mut transcript = Transcript::default();

    if behavior.greeting_code != 220 {
        let code = behavior.greeting_code;
        write
            .write_all(format!("{code} not serving\r\n").as_bytes())
            .await
            .unwrap();
        return transcript;
    }
    write.write_all(b"220 mock ESMTP\r\n").await.unwrap();

    let mut line = String::new();
    loop {
        line.clear();
        if lines.read_line(&mut line).await.unwrap() == 0 {
            break;
        }
        let command = line.trim_end().to_string();
        transcript.commands.push(command.clone());

        let verb = command
            .split_once(' ')
            .map_or(command.as_str(), |(verb, _)| verb)
            .to_ascii_uppercase();
        match verb.as_str() {
            "EHLO" => {
                if behavior.offer_auth {
                    write
                        .write_all(b"250-mock\r\n250-8BITMIME\r\n250 AUTH PLAIN\r\n")
                        .await
                        .unwrap();
                } else {
                    write
                        .write_all(b"250-mock\r\n250 8BITMIME\r\n")
                        .await
                        .unwrap();
                }
            }
            "HELO" => write.write_all(b"250 mock\r\n").await.unwrap(),
            "AUTH" => write.write_all(b"235 authenticated\r\n").await.unwrap(),
            "MAIL" => write.write_all(b"250 sender ok\r\n").await.unwrap(),
            "RCPT" => {
                let rejected = behavior
                    .reject_recipients
                    .iter()
                    .any(|rcpt| command.contains(rcpt.as_str()));
                if rejected {
                    write.write_all(b"550 no such user\r\n").await.unwrap();
                } else {
                    write.write_all(b"250 recipient ok\r\n").await.unwrap();
                }
            }
            "DATA" => {
                write.write_all(b"354 go ahead\r\n").await.unwrap();
                loop {
                    line.clear();
                    // A client may drop the socket mid-DATA; what arrived
                    // so far is still worth reporting.
                    if lines.read_line(&mut line).await.unwrap() == 0 {
                        return transcript;
                    }
                    if line == ".\r\n" || line == ".\n" {
                        break;
                    }
                    transcript.data.extend_from_slice(line.as_bytes());
                }
                write.write_all(b"250 queued\r\n").await.unwrap();
            }
            "QUIT" => {
                write.write_all(b"221 bye\r\n").await.unwrap();
                break;
            }
            _ => write.write_all(b"502 not implemented\r\n").await.unwrap(),
        }
    }

    transcript
}
