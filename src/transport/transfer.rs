//! File copies through `scp`, shared by both transports.

use std::ffi::OsString;

use camino::Utf8Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::runner::{CommandRunner, run_cancellable};

use super::context::{ConnectionContext, PreparedCredential, SessionOptions};
use super::ssh_args::{common_options, control_options, render, scp_port};
use super::{TransferDirection, TransferReceipt, TransportError};

/// Everything an `scp` invocation needs from its session.
pub(crate) struct TransferPlan<'a> {
    pub(crate) context: &'a ConnectionContext,
    pub(crate) options: &'a SessionOptions,
    pub(crate) credential: &'a PreparedCredential,
    /// Control socket to reuse, when the session has one.
    pub(crate) control_path: Option<&'a Utf8Path>,
}

impl TransferPlan<'_> {
    /// `scp` arguments for copying between `local` and `remote`.
    ///
    /// Copies are always recursive so directories and files share a code
    /// path; `-r` is harmless for regular files.
    pub(crate) fn args(
        &self,
        direction: TransferDirection,
        local: &Utf8Path,
        remote: &str,
    ) -> Vec<OsString> {
        let mut args = common_options(self.context, self.options, self.credential);
        args.extend(scp_port(self.context.port));
        if let Some(path) = self.control_path {
            args.extend(control_options(path, false));
        }
        args.push(OsString::from("-q"));
        args.push(OsString::from("-r"));
        let remote_spec = OsString::from(remote_spec(self.context, remote));
        let local_spec = OsString::from(local.as_str());
        match direction {
            TransferDirection::Upload => args.extend([local_spec, remote_spec]),
            TransferDirection::Download => args.extend([remote_spec, local_spec]),
        }
        args
    }

    /// Runs the copy and converts failures into [`TransportError::Transfer`].
    pub(crate) async fn run<R: CommandRunner + ?Sized>(
        &self,
        runner: &R,
        direction: TransferDirection,
        local: &Utf8Path,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, TransportError> {
        let args = self.args(direction, local, remote);
        let program = self.options.scp_bin.as_str();
        debug!(command = %render(program, &args), "starting file transfer");
        let output = run_cancellable(runner, program, &args, cancel).await?;

        if output.is_success() {
            return Ok(TransferReceipt {
                direction,
                local: local.to_path_buf(),
                remote: remote.to_owned(),
            });
        }

        let remote_spec = remote_spec(self.context, remote);
        let (source_path, destination) = match direction {
            TransferDirection::Upload => (local.to_string(), remote_spec),
            TransferDirection::Download => (remote_spec, local.to_string()),
        };
        let stderr = match output.code {
            Some(code) if output.stderr.trim().is_empty() => format!("exit status {code}"),
            None if output.stderr.trim().is_empty() => String::from("terminated by signal"),
            _ => output.stderr.trim().to_owned(),
        };
        Err(TransportError::Transfer {
            program: program.to_owned(),
            source_path,
            destination,
            stderr,
        })
    }
}

/// `user@host:path`, bracketing IPv6 literals as `scp` requires.
fn remote_spec(context: &ConnectionContext, remote: &str) -> String {
    if context.host.contains(':') {
        format!("{}@[{}]:{remote}", context.username, context.host)
    } else {
        format!("{}:{remote}", context.destination())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use crate::transport::Credential;
    use rstest::rstest;

    fn plan_render(
        context: &ConnectionContext,
        direction: TransferDirection,
        control_path: Option<&Utf8Path>,
    ) -> String {
        let options = SessionOptions::default();
        let credential = PreparedCredential::prepare(&Credential::Agent).expect("agent");
        let plan = TransferPlan {
            context,
            options: &options,
            credential: &credential,
            control_path,
        };
        render("scp", &plan.args(direction, Utf8Path::new("./dist"), "/srv/app"))
    }

    #[rstest]
    fn upload_puts_local_first_and_uses_upper_case_port() {
        let context = ConnectionContext::new("example.com", "deploy").with_port(2222);
        let rendered = plan_render(&context, TransferDirection::Upload, None);
        assert!(rendered.contains("-P 2222"), "{rendered}");
        assert!(
            rendered.ends_with("-q -r ./dist deploy@example.com:/srv/app"),
            "{rendered}"
        );
    }

    #[rstest]
    fn download_reuses_control_socket() {
        let context = ConnectionContext::new("example.com", "deploy");
        let rendered = plan_render(
            &context,
            TransferDirection::Download,
            Some(Utf8Path::new("/tmp/skiff-test.sock")),
        );
        assert!(rendered.contains("ControlPath=/tmp/skiff-test.sock"), "{rendered}");
        assert!(rendered.ends_with("deploy@example.com:/srv/app ./dist"), "{rendered}");
    }

    #[rstest]
    fn ipv6_hosts_are_bracketed() {
        let context = ConnectionContext::new("2001:db8::1", "deploy");
        assert_eq!(remote_spec(&context, "/tmp"), "deploy@[2001:db8::1]:/tmp");
    }

    #[rstest]
    #[tokio::test]
    async fn failed_copy_reports_source_and_destination() {
        let context = ConnectionContext::new("example.com", "deploy");
        let options = SessionOptions::default();
        let credential = PreparedCredential::prepare(&Credential::Agent).expect("agent");
        let plan = TransferPlan {
            context: &context,
            options: &options,
            credential: &credential,
            control_path: None,
        };
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "scp: /srv/app: Permission denied\n");

        let err = plan
            .run(
                &runner,
                TransferDirection::Upload,
                Utf8Path::new("./dist"),
                "/srv/app",
                &CancellationToken::new(),
            )
            .await
            .expect_err("copy should fail");

        assert_eq!(
            err,
            TransportError::Transfer {
                program: String::from("scp"),
                source_path: String::from("./dist"),
                destination: String::from("deploy@example.com:/srv/app"),
                stderr: String::from("scp: /srv/app: Permission denied"),
            }
        );
    }
}
