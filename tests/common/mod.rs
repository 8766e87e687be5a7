//! Scripted in-process connector shared by the integration tests.
//!
//! One-shot commands are answered from substring rules. Interactive shells
//! play back a conversation: each written line that equals the next
//! expected input releases the paired output. With echo on, every written
//! line is first played back the way a terminal echoes typed input.

#![allow(dead_code)]

use async_trait::async_trait;
use shellpilot::{
    ConnectionError, ConnectionErrorKind, Connector, Credential, ExecOutput, ProvisionError,
    PtyRequest, RemoteTarget, ShellChannel,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MAIN_MENU: &str = "\
\x1b[1;33m========== ADMRufu ==========\x1b[0m
 [1] > ADMINISTRAR CUENTAS (SSH/DROPBEAR)
 [2] > HERRAMIENTAS
 [0] > SALIR
 \x1b[1;32mIngresa una Opcion:\x1b[0m ";

pub const ACCOUNTS_MENU: &str = "\
 [1] > CREAR NUEVO USUARIO
 [2] > REMOVER USUARIO
 [3] > RENOVAR USUARIO
 [4] > BLOQUEAR/DESBLOQUEAR USUARIO
 [7] > MONITOR DE CONEXIONES
 [9] > ELIMINAR USUARIOS VENCIDOS
 Ingresa una Opcion: ";

#[derive(Default)]
pub struct Counters {
    pub commands: Mutex<Vec<String>>,
    pub writes: Mutex<Vec<String>>,
    pub shells_opened: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Counters {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    greeting: String,
    conversation: Vec<(String, String)>,
    rules: Vec<(String, ExecOutput)>,
    refused_hosts: Vec<String>,
    refuse_all: bool,
    fail_writes_after: Option<usize>,
    echo: bool,
    pub counters: Arc<Counters>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self {
            greeting: "root@vps:~# ".into(),
            ..Default::default()
        }
    }

    /// Output `output` once `input` is typed
    pub fn reply(mut self, input: &str, output: &str) -> Self {
        self.conversation.push((input.into(), output.into()));
        self
    }

    /// The standard way into the account submenu
    pub fn with_menu(self) -> Self {
        self.reply("menu", MAIN_MENU).reply("1", ACCOUNTS_MENU)
    }

    /// Answer one-shot commands containing `needle`
    pub fn exec(mut self, needle: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.rules.push((
            needle.into(),
            ExecOutput {
                exit_code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
        ));
        self
    }

    pub fn refuse_host(mut self, host: &str) -> Self {
        self.refused_hosts.push(host.into());
        self
    }

    pub fn refuse_all(mut self) -> Self {
        self.refuse_all = true;
        self
    }

    /// Echo typed lines back, like a real terminal
    pub fn echoing(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Writes after the first `n` fail with a broken pipe
    pub fn fail_writes_after(mut self, n: usize) -> Self {
        self.fail_writes_after = Some(n);
        self
    }

    fn check_reachable(&self, target: &RemoteTarget) -> Result<(), ProvisionError> {
        if self.refuse_all || self.refused_hosts.contains(&target.host) {
            return Err(ConnectionError::new(
                ConnectionErrorKind::Refused,
                &target.host,
                target.port,
                "connect: Connection refused",
            )
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn run_once(
        &self,
        target: &RemoteTarget,
        command: &str,
        _timeout: Duration,
    ) -> Result<ExecOutput, ProvisionError> {
        self.check_reachable(target)?;
        self.counters.commands.lock().unwrap().push(command.to_string());
        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn open_shell(
        &self,
        target: &RemoteTarget,
        _pty: &PtyRequest,
    ) -> Result<Box<dyn ShellChannel>, ProvisionError> {
        self.check_reachable(target)?;
        self.counters.shells_opened.fetch_add(1, Ordering::SeqCst);
        let mut pending = VecDeque::new();
        if !self.greeting.is_empty() {
            pending.push_back(self.greeting.clone().into_bytes());
        }
        Ok(Box::new(FakeShell {
            conversation: self.conversation.iter().cloned().collect(),
            pending,
            written: 0,
            fail_writes_after: self.fail_writes_after,
            echo: self.echo,
            counters: self.counters.clone(),
        }))
    }
}

struct FakeShell {
    conversation: VecDeque<(String, String)>,
    pending: VecDeque<Vec<u8>>,
    written: usize,
    fail_writes_after: Option<usize>,
    echo: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl ShellChannel for FakeShell {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.fail_writes_after.is_some_and(|n| self.written >= n) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel write failed"));
        }
        self.written += 1;

        let line = String::from_utf8_lossy(data).trim_end_matches(['\r', '\n']).to_string();
        self.counters.writes.lock().unwrap().push(line.clone());
        if self.echo {
            let echoed = line.replace('\u{3}', "^C");
            self.pending.push_back(format!("{echoed}\r\n").into_bytes());
        }
        if self.conversation.front().is_some_and(|(input, _)| *input == line) {
            if let Some((_, output)) = self.conversation.pop_front() {
                self.pending.push_back(output.into_bytes());
            }
        }
        Ok(())
    }

    async fn read(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.pending.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn target(host: &str) -> RemoteTarget {
    RemoteTarget::new(host, "root", Credential::password("hunter2"))
}
