//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Postern.
//
// Postern is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3  of the License, or (at your option)
// any later version.
//
// Postern is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Postern. If not, see <http://www.gnu.org/licenses/>.

//! Whole-dialogue tests: a real server on a loopback port, driven by a
//! plain synchronous client.

use std::future::Future;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::handler::{
    AuthenticationHandlerFactory, MessageHandler, MessageHandlerFactory,
    TlsSocketWrapper,
};
use crate::options::ServerOptions;
use crate::server::SmtpServer;
use crate::smtp::auth::{
    hmac_md5_hex, BasicAuthenticationFactory, CredentialsValidator,
    Mechanism,
};
use crate::smtp::reply::Reply;
use crate::smtp::session::Session;
use crate::smtp::syntax::MailParameters;
use crate::support::async_io::BoxedSessionStream;
use crate::support::error::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Recorded {
    from: String,
    parameters: MailParameters,
    recipients: Vec<String>,
    body: Vec<u8>,
}

#[derive(Default)]
struct RecordingInner {
    messages: Mutex<Vec<Recorded>>,
    aborted: AtomicUsize,
    reject_recipient: Option<String>,
    reject_message: bool,
    fail_sink: bool,
}

struct RecordingFactory {
    inner: Arc<RecordingInner>,
}

impl MessageHandlerFactory for RecordingFactory {
    fn create(&self, _session: &Session) -> Box<dyn MessageHandler> {
        Box::new(RecordingHandler {
            inner: Arc::clone(&self.inner),
            current: Recorded::default(),
            body: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

struct RecordingHandler {
    inner: Arc<RecordingInner>,
    current: Recorded,
    body: Arc<Mutex<Vec<u8>>>,
}

impl MessageHandler for RecordingHandler {
    fn mail_from(
        &mut self,
        reverse_path: &str,
        parameters: &MailParameters,
    ) -> Result<(), Reply> {
        self.current.from = reverse_path.to_owned();
        self.current.parameters = parameters.clone();
        Ok(())
    }

    fn recipient(&mut self, forward_path: &str) -> Result<(), Reply> {
        if self.inner.reject_recipient.as_deref() == Some(forward_path) {
            return Err(Reply::rejected());
        }
        self.current.recipients.push(forward_path.to_owned());
        Ok(())
    }

    fn data_sink(&mut self) -> io::Result<Box<dyn Write + Send>> {
        if self.inner.fail_sink {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "spool unavailable",
            ));
        }
        Ok(Box::new(SharedSink(Arc::clone(&self.body))))
    }

    fn message_complete(&mut self) -> Result<(), Reply> {
        if self.inner.reject_message {
            return Err(Reply::transaction_failed());
        }

        let mut message = std::mem::take(&mut self.current);
        message.body = std::mem::take(&mut *self.body.lock().unwrap());
        self.inner.messages.lock().unwrap().push(message);
        Ok(())
    }

    fn message_aborted(&mut self) {
        self.inner.aborted.fetch_add(1, Ordering::SeqCst);
        self.body.lock().unwrap().clear();
    }
}

struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A STARTTLS wrapper that swaps nothing, so the post-upgrade state reset
/// is observable without a TLS client stack.
struct PassThroughTls;

impl TlsSocketWrapper for PassThroughTls {
    fn wrap(
        &self,
        plain: BoxedSessionStream,
    ) -> Pin<
        Box<dyn Future<Output = io::Result<BoxedSessionStream>> + Send + '_>,
    > {
        Box::pin(async move { Ok(plain) })
    }
}

struct OneUser;

impl CredentialsValidator for OneUser {
    fn check_plain(&self, username: &str, password: &str) -> bool {
        "a" == username && "p" == password
    }

    fn lookup_secret(&self, username: &str) -> Option<String> {
        ("a" == username).then(|| "p".to_owned())
    }
}

fn auth_factory() -> Arc<dyn AuthenticationHandlerFactory> {
    Arc::new(BasicAuthenticationFactory::new(
        "mx.test",
        vec![Mechanism::Plain, Mechanism::Login, Mechanism::CramMd5],
        Arc::new(OneUser),
    ))
}

fn test_options() -> ServerOptions {
    ServerOptions {
        host_name: "mx.test".to_owned(),
        software_name: "X 1.0".to_owned(),
        bind_address: Some("127.0.0.1".parse().unwrap()),
        port: 0,
        insert_received_headers: false,
        ..ServerOptions::default()
    }
}

struct TestServer {
    inner: Arc<RecordingInner>,
    server: SmtpServer,
    rt: tokio::runtime::Runtime,
}

struct TestConfig {
    options: ServerOptions,
    recording: RecordingInner,
    auth: Option<Arc<dyn AuthenticationHandlerFactory>>,
    tls: Option<Arc<dyn TlsSocketWrapper>>,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            options: test_options(),
            recording: RecordingInner::default(),
            auth: None,
            tls: None,
        }
    }
}

fn start_server(config: TestConfig) -> TestServer {
    let inner = Arc::new(config.recording);
    let mut server = SmtpServer::new(
        config.options,
        Arc::new(RecordingFactory {
            inner: Arc::clone(&inner),
        }),
    );
    if let Some(auth) = config.auth {
        server = server.with_authentication_handler_factory(auth);
    }
    if let Some(tls) = config.tls {
        server = server.with_tls_wrapper(tls);
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(server.start()).unwrap();

    TestServer { inner, server, rt }
}

impl TestServer {
    fn connect(&self, name: &'static str) -> SmtpClient {
        SmtpClient::new(
            name,
            TcpStream::connect(("127.0.0.1", self.server.allocated_port()))
                .unwrap(),
        )
    }

    fn messages(&self) -> Vec<Recorded> {
        self.inner.messages.lock().unwrap().clone()
    }

    fn aborted(&self) -> usize {
        self.inner.aborted.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.rt.block_on(self.server.stop());
    }
}

struct SmtpClient {
    name: &'static str,
    io: TcpStream,
}

impl SmtpClient {
    fn new(name: &'static str, io: TcpStream) -> Self {
        io.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        Self { name, io }
    }

    /// Read responses from the server up to and including the final
    /// response line.
    ///
    /// This creates a `BufReader` over `io` and will lose any data which
    /// was buffered after the last read line; tests that pipeline keep
    /// their own reader instead.
    fn read_responses(&mut self) -> Vec<String> {
        let mut ret = Vec::<String>::new();
        let mut r = BufReader::new(&mut self.io);

        loop {
            let mut line = String::new();
            r.read_line(&mut line).unwrap();
            println!("[{}] >> {:?}", self.name, line);

            if line.is_empty() {
                panic!("Unexpected EOF");
            }

            let last = " " == &line[3..4];
            ret.push(line.trim_end().to_owned());

            if last {
                break;
            }
        }

        ret
    }

    /// Writes the given complete line(s) to the server.
    fn write_line(&mut self, s: &str) {
        assert!(s.ends_with('\n'));
        for line in s.split_inclusive('\n') {
            println!("[{}] << {:?}", self.name, line);
        }
        self.io.write_all(s.as_bytes()).unwrap();
    }

    fn write_raw(&mut self, data: &[u8]) {
        println!("[{}] << [{} bytes]", self.name, data.len());
        self.io.write_all(data).unwrap();
    }

    /// Send a command which is expected to have one response with the
    /// given prefix.
    fn simple_command(&mut self, command: &str, prefix: &str) {
        self.write_line(&format!("{}\r\n", command));
        let responses = self.read_responses();
        assert_eq!(1, responses.len());
        assert!(
            responses[0].starts_with(prefix),
            "expected {:?}, got {:?}",
            prefix,
            responses[0],
        );
    }

    /// Skip the server greeting, then send the given command and consume
    /// the responses, asserting success.
    fn skip_pleasantries(&mut self, cmd: &str) {
        self.read_responses();
        self.write_line(&format!("{}\r\n", cmd));
        let responses = self.read_responses();
        assert!(responses.last().unwrap().starts_with("250"));
    }

    fn expect_eof(&mut self) {
        let mut buf = [0u8; 1];
        match self.io.read(&mut buf) {
            Ok(0) => (),
            other => panic!("expected EOF, got {:?}", other),
        }
    }
}

#[test]
fn greeting_and_quit() {
    let server = start_server(TestConfig::default());
    let mut client = server.connect("quit");

    assert_eq!(vec!["220 mx.test ESMTP X 1.0"], client.read_responses());
    client.simple_command("QUIT", "221 mx.test closing connection");
    client.expect_eof();
}

#[test]
fn simple_message_delivery() {
    let server = start_server(TestConfig::default());
    let mut client = server.connect("simple");

    client.read_responses();
    client.write_line("EHLO client.test\r\n");
    assert_eq!(
        vec![
            "250-mx.test",
            "250-8BITMIME",
            "250-SIZE",
            "250-PIPELINING",
            "250-ENHANCEDSTATUSCODES",
            "250 OK",
        ],
        client.read_responses(),
    );

    client.simple_command("MAIL FROM:<a@x>", "250 2.1.0 Ok");
    client.simple_command("RCPT TO:<b@y>", "250 2.1.5 Ok");
    client.simple_command("DATA", "354 End data with <CR><LF>.<CR><LF>");
    client.write_raw(b"Subject: hi\r\n\r\nhello\r\n.\r\n");
    assert_eq!(
        vec!["250 2.6.0 Message accepted"],
        client.read_responses(),
    );
    client.simple_command("QUIT", "221");

    let messages = server.messages();
    assert_eq!(1, messages.len());
    assert_eq!("a@x", messages[0].from);
    assert_eq!(vec!["b@y".to_owned()], messages[0].recipients);
    assert_eq!(b"Subject: hi\r\n\r\nhello\r\n".to_vec(), messages[0].body);
}

#[test]
fn helo_still_works() {
    let server = start_server(TestConfig::default());
    let mut client = server.connect("helo");

    client.read_responses();
    client.simple_command("HELO client.test", "250 mx.test");
    client.simple_command("MAIL FROM:<a@x>", "250 2.1.0 Ok");
    client.simple_command("RCPT TO:<b@y>", "250 2.1.5 Ok");
    client.simple_command("DATA", "354");
    client.write_raw(b"ahoy\r\n.\r\n");
    assert_eq!(
        vec!["250 2.6.0 Message accepted"],
        client.read_responses(),
    );
}

#[test]
fn received_header_injected_when_enabled() {
    let server = start_server(TestConfig {
        options: ServerOptions {
            insert_received_headers: true,
            ..test_options()
        },
        ..TestConfig::default()
    });
    let mut client = server.connect("received");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("MAIL FROM:<a@x>", "250");
    client.simple_command("RCPT TO:<b@y>", "250");
    client.simple_command("DATA", "354");
    client.write_raw(b"hello\r\n.\r\n");
    client.read_responses();
    client.simple_command("QUIT", "221");

    let messages = server.messages();
    assert_eq!(1, messages.len());
    let body = String::from_utf8(messages[0].body.clone()).unwrap();
    assert!(
        body.starts_with("Received: from client.test (unknown [127.0.0.1])\r\n"),
        "unexpected header: {:?}",
        body,
    );
    assert!(body.contains("\tby mx.test (X 1.0) with ESMTP id "));
    assert!(body.contains("\tfor <b@y>; "));
    assert!(body.ends_with("hello\r\n"));
}

#[test]
fn declared_size_over_limit_rejected() {
    let server = start_server(TestConfig {
        options: ServerOptions {
            max_message_size: 1000,
            ..test_options()
        },
        ..TestConfig::default()
    });
    let mut client = server.connect("size");

    client.read_responses();
    client.write_line("EHLO client.test\r\n");
    let responses = client.read_responses();
    assert!(responses.contains(&"250-SIZE 1000".to_owned()));

    client.simple_command(
        "MAIL FROM:<a@x> SIZE=2000",
        "552 5.3.4 Message size exceeds fixed limit",
    );
    // The refused MAIL left no envelope behind.
    client.simple_command("MAIL FROM:<a@x> SIZE=500", "250 2.1.0 Ok");
}

#[test]
fn require_auth_gates_mail() {
    let server = start_server(TestConfig {
        options: ServerOptions {
            require_auth: true,
            ..test_options()
        },
        auth: Some(auth_factory()),
        ..TestConfig::default()
    });
    let mut client = server.connect("auth-gate");

    client.read_responses();
    client.write_line("EHLO client.test\r\n");
    let responses = client.read_responses();
    assert!(responses
        .contains(&"250-AUTH PLAIN LOGIN CRAM-MD5".to_owned()));

    client.simple_command(
        "MAIL FROM:<a@x>",
        "530 5.7.0 Authentication required",
    );

    let initial = base64::encode(b"\x00a\x00p");
    client.simple_command(
        &format!("AUTH PLAIN {}", initial),
        "235 2.7.0 Authentication successful",
    );
    client.simple_command("MAIL FROM:<a@x>", "250 2.1.0 Ok");
}

#[test]
fn auth_login_dialogue() {
    let server = start_server(TestConfig {
        auth: Some(auth_factory()),
        ..TestConfig::default()
    });
    let mut client = server.connect("login");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("AUTH LOGIN", "334 VXNlcm5hbWU6");
    client.simple_command(&base64::encode("a"), "334 UGFzc3dvcmQ6");
    client.simple_command(&base64::encode("p"), "235 2.7.0");

    // Second AUTH on an authenticated session is out of sequence.
    client.simple_command("AUTH LOGIN", "503");
}

#[test]
fn auth_failures_and_abort() {
    let server = start_server(TestConfig {
        auth: Some(auth_factory()),
        ..TestConfig::default()
    });
    let mut client = server.connect("auth-fail");

    client.skip_pleasantries("EHLO client.test");

    let bad = base64::encode(b"\x00a\x00wrong");
    client.simple_command(
        &format!("AUTH PLAIN {}", bad),
        "535 5.7.8 Authentication failed",
    );

    client.simple_command("AUTH LOGIN", "334");
    client.simple_command("*", "501 Authentication aborted");

    client.simple_command("AUTH LOGIN", "334");
    client.simple_command("!!!", "501 5.5.4 Invalid base64");

    client.simple_command("AUTH NTLM", "504 5.5.4");

    // The session survives all of the above.
    client.simple_command("NOOP", "250");
}

#[test]
fn auth_cram_md5_round_trip() {
    let server = start_server(TestConfig {
        auth: Some(auth_factory()),
        ..TestConfig::default()
    });
    let mut client = server.connect("cram");

    client.skip_pleasantries("EHLO client.test");
    client.write_line("AUTH CRAM-MD5\r\n");
    let responses = client.read_responses();
    assert_eq!(1, responses.len());
    let challenge =
        base64::decode(responses[0].strip_prefix("334 ").unwrap()).unwrap();

    let digest = hmac_md5_hex(b"p", &challenge);
    let response = base64::encode(format!("a {}", digest));
    client.simple_command(&response, "235 2.7.0");
}

#[test]
fn starttls_resets_session_state() {
    let server = start_server(TestConfig {
        options: ServerOptions {
            enable_tls: true,
            ..test_options()
        },
        tls: Some(Arc::new(PassThroughTls)),
        ..TestConfig::default()
    });
    let mut client = server.connect("starttls");

    client.read_responses();
    client.write_line("EHLO c1\r\n");
    let responses = client.read_responses();
    assert!(responses.contains(&"250-STARTTLS".to_owned()));

    client.simple_command("STARTTLS", "220 Ready to start TLS");

    // RFC 3207: the client must discard its knowledge of the server and
    // greet again.
    client.simple_command(
        "MAIL FROM:<a@x>",
        "503 5.5.1 Error: send HELO/EHLO first",
    );

    client.write_line("EHLO c2\r\n");
    let responses = client.read_responses();
    assert!(!responses.contains(&"250-STARTTLS".to_owned()));

    client.simple_command("MAIL FROM:<a@x>", "250 2.1.0 Ok");
    client.simple_command("RCPT TO:<b@y>", "250 2.1.5 Ok");
    client.simple_command("DATA", "354");
    client.write_raw(b"over tls, allegedly\r\n.\r\n");
    client.read_responses();

    assert_eq!(1, server.messages().len());
}

#[test]
fn starttls_with_pipelined_cleartext_aborts() {
    let server = start_server(TestConfig {
        options: ServerOptions {
            enable_tls: true,
            ..test_options()
        },
        tls: Some(Arc::new(PassThroughTls)),
        ..TestConfig::default()
    });
    let mut client = server.connect("tls-inject");

    client.read_responses();
    client.write_line("EHLO c1\r\n");
    client.read_responses();

    // An attacker-style batch: the EHLO rides in the same cleartext
    // segment as STARTTLS. The server must answer 220 and then drop the
    // connection rather than process the smuggled command.
    client.write_raw(b"STARTTLS\r\nEHLO evil\r\n");
    assert_eq!(vec!["220 Ready to start TLS"], client.read_responses());
    client.expect_eof();
}

#[test]
fn starttls_refused_when_disabled() {
    let server = start_server(TestConfig::default());
    let mut client = server.connect("no-tls");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("STARTTLS", "454");
}

#[test]
fn require_tls_gates_mail() {
    let server = start_server(TestConfig {
        options: ServerOptions {
            enable_tls: true,
            require_tls: true,
            ..test_options()
        },
        tls: Some(Arc::new(PassThroughTls)),
        ..TestConfig::default()
    });
    let mut client = server.connect("tls-gate");

    client.skip_pleasantries("EHLO c1");
    client.simple_command(
        "MAIL FROM:<a@x>",
        "530 5.7.0 Must issue a STARTTLS command first",
    );

    client.simple_command("STARTTLS", "220");
    client.write_line("EHLO c2\r\n");
    assert!(client.read_responses().last().unwrap().starts_with("250"));
    client.simple_command("MAIL FROM:<a@x>", "250 2.1.0 Ok");
}

#[test]
fn dot_stuffing_unstuffed_before_delivery() {
    let server = start_server(TestConfig::default());
    let mut client = server.connect("stuffing");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("MAIL FROM:<a@x>", "250");
    client.simple_command("RCPT TO:<b@y>", "250");
    client.simple_command("DATA", "354");
    client.write_raw(b"..hello\r\n.\r\n");
    client.read_responses();

    assert_eq!(b".hello\r\n".to_vec(), server.messages()[0].body);
}

#[test]
fn idle_connection_times_out() {
    let server = start_server(TestConfig {
        options: ServerOptions {
            connection_timeout: Duration::from_millis(200),
            ..test_options()
        },
        ..TestConfig::default()
    });
    let mut client = server.connect("idle");

    client.read_responses();
    // Say nothing.
    assert_eq!(
        vec!["421 4.4.2 Timeout, closing connection"],
        client.read_responses(),
    );
    client.expect_eof();
}

#[test]
fn connection_limit_enforced_and_released() {
    let server = start_server(TestConfig {
        options: ServerOptions {
            max_connections: 1,
            ..test_options()
        },
        ..TestConfig::default()
    });

    let mut first = server.connect("first");
    first.read_responses();

    let mut second = server.connect("second");
    assert_eq!(
        vec!["421 4.7.0 mx.test Too many connections, try again later"],
        second.read_responses(),
    );
    second.expect_eof();

    first.simple_command("QUIT", "221");
    first.expect_eof();

    // The slot frees once the first session's task unwinds.
    let mut reconnected = None;
    for _ in 0..100 {
        let mut client = server.connect("third");
        let greeting = client.read_responses();
        if greeting[0].starts_with("220") {
            reconnected = Some(client);
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    let mut client = reconnected.expect("connection slot never freed");
    client.simple_command("NOOP", "250");
}

#[test]
fn rset_is_idempotent() {
    let server = start_server(TestConfig::default());
    let mut client = server.connect("rset");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("MAIL FROM:<a@x>", "250");
    client.simple_command("RCPT TO:<b@y>", "250");

    client.simple_command("RSET", "250 2.0.0 Ok");
    client.simple_command("RSET", "250 2.0.0 Ok");

    // The transaction is gone either way.
    client.simple_command("DATA", "503");
    client.simple_command("MAIL FROM:<c@z>", "250 2.1.0 Ok");

    // One abort for the transaction RSET threw away; the second RSET had
    // nothing to abort.
    assert_eq!(1, server.aborted());
}

#[test]
fn quit_aborts_open_transaction() {
    let server = start_server(TestConfig::default());
    let mut client = server.connect("quit-abort");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("MAIL FROM:<a@x>", "250");
    client.simple_command("RCPT TO:<b@y>", "250");
    client.simple_command("QUIT", "221");
    client.expect_eof();

    for _ in 0..100 {
        if server.aborted() > 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(1, server.aborted());
    assert!(server.messages().is_empty());
}

#[test]
fn sequence_errors() {
    let server = start_server(TestConfig::default());
    let mut client = server.connect("sequence");

    client.read_responses();
    client.simple_command("FROBNICATE", "500 5.5.1 Error: command not recognized");
    client.simple_command(
        "MAIL FROM:<a@x>",
        "503 5.5.1 Error: send HELO/EHLO first",
    );
    client.write_line("EHLO client.test\r\n");
    assert!(client.read_responses().last().unwrap().starts_with("250"));
    client.simple_command("RCPT TO:<b@y>", "503 5.5.1 Error: need MAIL command");
    client.simple_command("DATA", "503");
    client.simple_command("MAIL FROM:<a@x>", "250");
    client.simple_command("MAIL FROM:<b@x>", "503 5.5.1 Sender already specified");
    client.simple_command("DATA", "503 5.5.1 Error: need RCPT (recipient)");
}

#[test]
fn syntax_and_parameter_errors() {
    let server = start_server(TestConfig::default());
    let mut client = server.connect("syntax");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("MAIL FROM:a@x", "501 5.5.4");
    client.simple_command("MAIL FROM:<a@x> FOO=BAR", "504 5.5.4");
    client.simple_command("MAIL FROM:<a@x> BODY=8BITMIME", "250 2.1.0 Ok");
    client.simple_command("RCPT TO:<>", "501 5.5.4");
    client.simple_command("RCPT TO:<b@y> NOTIFY=NEVER", "504 5.5.4");
    client.simple_command("VRFY whoever", "252");
    client.simple_command("EXPN list", "502");
    client.write_line("HELP\r\n");
    let responses = client.read_responses();
    assert!(responses.len() > 1);
    assert!(responses[0].starts_with("214-"));
}

#[test]
fn rejected_recipient_and_rejected_message() {
    let server = start_server(TestConfig {
        recording: RecordingInner {
            reject_recipient: Some("bad@y".to_owned()),
            ..RecordingInner::default()
        },
        ..TestConfig::default()
    });
    let mut client = server.connect("reject");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("MAIL FROM:<a@x>", "250");
    client.simple_command("RCPT TO:<bad@y>", "550 5.7.1 Rejected");
    client.simple_command("RCPT TO:<good@y>", "250 2.1.5 Ok");
    client.simple_command("DATA", "354");
    client.write_raw(b"hi\r\n.\r\n");
    client.read_responses();

    let messages = server.messages();
    assert_eq!(vec!["good@y".to_owned()], messages[0].recipients);
}

#[test]
fn handler_rejects_completed_message() {
    let server = start_server(TestConfig {
        recording: RecordingInner {
            reject_message: true,
            ..RecordingInner::default()
        },
        ..TestConfig::default()
    });
    let mut client = server.connect("reject-msg");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("MAIL FROM:<a@x>", "250");
    client.simple_command("RCPT TO:<b@y>", "250");
    client.simple_command("DATA", "354");
    client.write_raw(b"hi\r\n.\r\n");
    assert_eq!(
        vec!["554 5.0.0 Transaction failed"],
        client.read_responses(),
    );

    // The failed transaction is cleared; a new one may start.
    client.simple_command("MAIL FROM:<a@x>", "250 2.1.0 Ok");
}

#[test]
fn failed_sink_consumes_data_and_fails_transaction() {
    let server = start_server(TestConfig {
        recording: RecordingInner {
            fail_sink: true,
            ..RecordingInner::default()
        },
        ..TestConfig::default()
    });
    let mut client = server.connect("sink");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("MAIL FROM:<a@x>", "250");
    client.simple_command("RCPT TO:<b@y>", "250");
    client.simple_command("DATA", "354");
    client.write_raw(b"this all goes nowhere\r\n.\r\n");
    assert_eq!(
        vec!["554 5.0.0 Transaction failed"],
        client.read_responses(),
    );

    // The stream stayed in sync despite the discarded payload.
    client.simple_command("NOOP", "250");
    assert_eq!(1, server.aborted());
}

#[test]
fn max_recipients_enforced() {
    let server = start_server(TestConfig {
        options: ServerOptions {
            max_recipients: 2,
            ..test_options()
        },
        ..TestConfig::default()
    });
    let mut client = server.connect("max-rcpt");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("MAIL FROM:<a@x>", "250");
    client.simple_command("RCPT TO:<r1@y>", "250");
    client.simple_command("RCPT TO:<r2@y>", "250");
    client.simple_command("RCPT TO:<r3@y>", "452 4.5.3 Too many recipients");

    // The transaction is still deliverable to the accepted two.
    client.simple_command("DATA", "354");
    client.write_raw(b"hi\r\n.\r\n");
    client.read_responses();
    assert_eq!(2, server.messages()[0].recipients.len());
}

#[test]
fn duplicate_recipients_deduplicated() {
    let server = start_server(TestConfig::default());
    let mut client = server.connect("dup-rcpt");

    client.skip_pleasantries("EHLO client.test");
    client.simple_command("MAIL FROM:<a@x>", "250");
    client.simple_command("RCPT TO:<b@y>", "250 2.1.5 Ok");
    client.simple_command("RCPT TO:<b@y>", "250 2.1.5 Ok");
    client.simple_command("DATA", "354");
    client.write_raw(b"hi\r\n.\r\n");
    client.read_responses();

    assert_eq!(vec!["b@y".to_owned()], server.messages()[0].recipients);
}

#[test]
fn pipelined_commands_answered_in_order() {
    let server = start_server(TestConfig::default());
    let client = server.connect("pipeline");

    let mut writer = client.io.try_clone().unwrap();
    let mut reader = BufReader::new(client.io);

    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert!(line.starts_with("220"));

    // One segment, four commands.
    writer
        .write_all(
            b"EHLO client.test\r\nMAIL FROM:<a@x>\r\nRCPT TO:<b@y>\r\nDATA\r\n",
        )
        .unwrap();

    let read_final = |reader: &mut BufReader<TcpStream>| loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(!line.is_empty(), "unexpected EOF");
        if " " == &line[3..4] {
            return line.trim_end().to_owned();
        }
    };

    assert_eq!("250 OK", read_final(&mut reader));
    assert_eq!("250 2.1.0 Ok", read_final(&mut reader));
    assert_eq!("250 2.1.5 Ok", read_final(&mut reader));
    assert!(read_final(&mut reader).starts_with("354"));

    writer.write_all(b"pipelined body\r\n.\r\nQUIT\r\n").unwrap();
    assert_eq!("250 2.6.0 Message accepted", read_final(&mut reader));
    assert!(read_final(&mut reader).starts_with("221"));

    assert_eq!(1, server.messages().len());
}

#[test]
fn over_long_command_line_survivable() {
    let server = start_server(TestConfig::default());
    let mut client = server.connect("long-line");

    client.read_responses();
    let mut long = "NOOP ".to_owned();
    long.push_str(&"x".repeat(1100));
    client.simple_command(&long, "500 5.5.2 Line too long");
    client.simple_command("NOOP", "250");
}

#[test]
fn lifecycle_is_single_shot() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let mut server = SmtpServer::new(
        test_options(),
        Arc::new(RecordingFactory {
            inner: Arc::new(RecordingInner::default()),
        }),
    );

    assert!(!server.is_running());
    rt.block_on(server.start()).unwrap();
    assert!(server.is_running());
    assert_ne!(0, server.allocated_port());

    assert_matches!(
        Err(Error::AlreadyStarted),
        rt.block_on(server.start())
    );

    rt.block_on(server.stop());
    assert!(!server.is_running());
    // A second stop is a no-op.
    rt.block_on(server.stop());

    assert_matches!(Err(Error::CannotRestart), rt.block_on(server.start()));
}

#[test]
fn require_auth_without_factory_is_a_config_error() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let mut server = SmtpServer::new(
        ServerOptions {
            require_auth: true,
            ..test_options()
        },
        Arc::new(RecordingFactory {
            inner: Arc::new(RecordingInner::default()),
        }),
    );
    assert_matches!(Err(Error::Config(_)), rt.block_on(server.start()));
}
