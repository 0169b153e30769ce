// Shutdown sequencer
// Single ordered teardown shared by every termination trigger.

use log::{debug, info};
use serde::Serialize;

use crate::presence::PresenceBroadcaster;
use crate::tray::TrayController;
use crate::windows::{WindowKind, WindowManager};

/// Ends the process. The Tauri implementation calls `AppHandle::exit`.
pub trait ProcessControl: Send + Sync {
    fn exit(&self, code: i32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownTrigger {
    TrayMenu,
    WindowClose(WindowKind),
    QuitMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownStep {
    PresenceDisconnected,
    MainWindowDestroyed,
    UpdateWindowDestroyed,
    TrayDestroyed,
    ProcessExit,
}

/// Steps that actually released something, in the order they ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub released: Vec<ShutdownStep>,
}

pub struct ShutdownSequencer<'a> {
    pub presence: &'a PresenceBroadcaster,
    pub windows: &'a WindowManager,
    pub tray: &'a TrayController,
    pub process: &'a dyn ProcessControl,
}

impl ShutdownSequencer<'_> {
    /// Presence, main window, update window, tray, then exit. Resources that are
    /// already gone are skipped; the exit request is always issued.
    pub fn run(&self, trigger: ShutdownTrigger) -> ShutdownReport {
        info!("[SHUTDOWN] Shutting down ({:?})", trigger);
        let mut report = ShutdownReport::default();

        if self.presence.disconnect() {
            report.released.push(ShutdownStep::PresenceDisconnected);
        }
        if self.windows.destroy_window(WindowKind::Main) {
            report.released.push(ShutdownStep::MainWindowDestroyed);
        }
        if self.windows.destroy_window(WindowKind::Update) {
            report.released.push(ShutdownStep::UpdateWindowDestroyed);
        }
        if self.tray.destroy() {
            report.released.push(ShutdownStep::TrayDestroyed);
        }

        debug!("[SHUTDOWN] Released {:?}", report.released);
        report.released.push(ShutdownStep::ProcessExit);
        self.process.exit(0);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{PresenceError, PresenceState, PresenceTemplate, PresenceTransport};
    use crate::tray::{TrayError, TrayHost, TraySpec};
    use crate::windows::{ProgressState, WindowAction, WindowError, WindowHost};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    struct JournalHost(Journal);

    impl WindowHost for JournalHost {
        fn build(&self, _kind: WindowKind) -> Result<(), WindowError> {
            Ok(())
        }

        fn destroy(&self, kind: WindowKind) -> Result<(), WindowError> {
            self.0.push(format!("destroy:{}", kind.label()));
            Ok(())
        }

        fn perform(&self, _kind: WindowKind, _action: WindowAction) -> Result<(), WindowError> {
            Ok(())
        }

        fn set_progress(&self, _kind: WindowKind, _progress: ProgressState) -> Result<(), WindowError> {
            Ok(())
        }

        fn emit(&self, _kind: WindowKind, _event: &str, _payload: Value) -> Result<(), WindowError> {
            Ok(())
        }
    }

    impl TrayHost for JournalHost {
        fn create(&self, _spec: &TraySpec) -> Result<(), TrayError> {
            Ok(())
        }

        fn destroy(&self) -> Result<(), TrayError> {
            self.0.push("destroy:tray");
            Ok(())
        }
    }

    struct JournalTransport(Journal);

    impl PresenceTransport for JournalTransport {
        fn connect(&mut self) -> Result<(), PresenceError> {
            Ok(())
        }

        fn set_activity(&mut self, _state: &PresenceState) -> Result<(), PresenceError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), PresenceError> {
            self.0.push("presence:close");
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingExit(AtomicUsize);

    impl ProcessControl for CountingExit {
        fn exit(&self, _code: i32) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        journal: Journal,
        presence: PresenceBroadcaster,
        windows: WindowManager,
        tray: TrayController,
        exit: CountingExit,
    }

    impl Fixture {
        fn new() -> Self {
            let journal = Journal::default();
            let host = Arc::new(JournalHost(journal.clone()));
            Fixture {
                presence: PresenceBroadcaster::new(Box::new(JournalTransport(journal.clone())), true),
                windows: WindowManager::new(host.clone()),
                tray: TrayController::new(host),
                exit: CountingExit::default(),
                journal,
            }
        }

        fn bring_up(&self) {
            let template = PresenceTemplate {
                headline: "Playing".into(),
                large_image_key: "logo".into(),
                large_image_text: "BlockHaven".into(),
            };
            self.presence.update_presence(&template.starting(0));
            self.windows.create_window(WindowKind::Update).unwrap();
            self.windows.create_window(WindowKind::Main).unwrap();
            self.tray
                .initialize(TraySpec::new("BlockHaven", None, "Open", "Close"))
                .unwrap();
        }

        fn sequencer(&self) -> ShutdownSequencer<'_> {
            ShutdownSequencer {
                presence: &self.presence,
                windows: &self.windows,
                tray: &self.tray,
                process: &self.exit,
            }
        }
    }

    #[test]
    fn test_teardown_runs_in_fixed_order() {
        let fixture = Fixture::new();
        fixture.bring_up();

        let report = fixture.sequencer().run(ShutdownTrigger::TrayMenu);

        assert_eq!(
            fixture.journal.take(),
            vec!["presence:close", "destroy:main", "destroy:update", "destroy:tray"]
        );
        assert_eq!(
            report.released,
            vec![
                ShutdownStep::PresenceDisconnected,
                ShutdownStep::MainWindowDestroyed,
                ShutdownStep::UpdateWindowDestroyed,
                ShutdownStep::TrayDestroyed,
                ShutdownStep::ProcessExit,
            ]
        );
        assert_eq!(fixture.exit.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_run_releases_nothing_but_still_exits() {
        let fixture = Fixture::new();
        fixture.bring_up();

        fixture.sequencer().run(ShutdownTrigger::QuitMessage);
        fixture.journal.take();
        let report = fixture.sequencer().run(ShutdownTrigger::QuitMessage);

        assert!(fixture.journal.take().is_empty());
        assert_eq!(report.released, vec![ShutdownStep::ProcessExit]);
        assert_eq!(fixture.exit.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_partial_bring_up_skips_missing_resources() {
        let fixture = Fixture::new();
        fixture.windows.create_window(WindowKind::Update).unwrap();

        let report = fixture
            .sequencer()
            .run(ShutdownTrigger::WindowClose(WindowKind::Update));

        assert_eq!(fixture.journal.take(), vec!["destroy:update"]);
        assert_eq!(
            report.released,
            vec![ShutdownStep::UpdateWindowDestroyed, ShutdownStep::ProcessExit]
        );
    }
}
