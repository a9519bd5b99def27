//! Confirmation gates in front of destructive work.
//!
//! Destructive runs need an [`ArmToken`], and the only way to get one is a
//! matching answer from a [`Confirmer`].

use livecopy_error::ProvisionError;
use livecopy_hal::{BootRecordOptions, FormatOptions, PartitionOptions, StorageDevice};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

/// Phrase that must be typed exactly when a hard disk is selected.
pub const ERASE_CONFIRMATION: &str = "I UNDERSTAND THIS WILL ERASE THE SELECTED DISK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmRequest {
    /// Plain yes/no before erasing removable media.
    YesNo { devices: Vec<PathBuf> },
    /// Typed phrase before erasing a selection that contains a hard disk.
    TypedPhrase {
        devices: Vec<PathBuf>,
        phrase: &'static str,
    },
    /// Deactivating `swap` would leave only `free_after_bytes` of memory.
    LowMemorySwap { swap: PathBuf, free_after_bytes: u64 },
}

impl ConfirmRequest {
    pub fn for_selection(devices: &[StorageDevice]) -> Self {
        let paths = devices.iter().map(|d| d.path.clone()).collect();
        if devices.iter().any(|d| !d.is_removable()) {
            ConfirmRequest::TypedPhrase {
                devices: paths,
                phrase: ERASE_CONFIRMATION,
            }
        } else {
            ConfirmRequest::YesNo { devices: paths }
        }
    }

    pub fn message(&self) -> String {
        let list = |devices: &[PathBuf]| {
            devices
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            ConfirmRequest::YesNo { devices } => format!(
                "All data on {} will be destroyed. Continue?",
                list(devices)
            ),
            ConfirmRequest::TypedPhrase { devices, phrase } => format!(
                "The selection {} contains a hard disk. All data on it will be destroyed.\nType '{}' to continue:",
                list(devices),
                phrase
            ),
            ConfirmRequest::LowMemorySwap {
                swap,
                free_after_bytes,
            } => format!(
                "Turning off swap {} leaves only {} MiB of free memory. Continue anyway?",
                swap.display(),
                free_after_bytes / (1024 * 1024)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    Typed(String),
}

impl Answer {
    /// Whether this answer satisfies `request`.
    pub fn approves(&self, request: &ConfirmRequest) -> bool {
        match (request, self) {
            (ConfirmRequest::TypedPhrase { phrase, .. }, Answer::Typed(text)) => {
                text.trim_end_matches(['\r', '\n']) == *phrase
            }
            (ConfirmRequest::TypedPhrase { .. }, _) => false,
            (_, Answer::Yes) => true,
            _ => false,
        }
    }
}

/// Asks the operator. Implemented by the terminal front end and by
/// [`ScriptedConfirmer`].
pub trait Confirmer {
    fn confirm(&self, request: &ConfirmRequest) -> Answer;
}

/// Proof that the destructive selection was confirmed.
#[derive(Debug, Clone, Copy)]
pub struct ArmToken(());

impl ArmToken {
    pub fn try_new(request: &ConfirmRequest, answer: &Answer) -> Result<Self, ProvisionError> {
        if !answer.approves(request) {
            return Err(ProvisionError::SafetyAbort(
                "destructive action not confirmed".to_string(),
            ));
        }
        Ok(Self(()))
    }

    /// The HAL refuses unconfirmed destructive calls; these constructors are
    /// the only place `confirmed` is set.
    pub fn partition_options(&self, dry_run: bool) -> PartitionOptions {
        PartitionOptions::new(dry_run, true)
    }

    pub fn format_options(&self, dry_run: bool) -> FormatOptions {
        FormatOptions::new(dry_run, true)
    }

    pub fn boot_record_options(&self, dry_run: bool) -> BootRecordOptions {
        BootRecordOptions::new(dry_run, true)
    }
}

/// Confirmer with canned answers.
///
/// Queued answers are used first; after that every request gets the
/// fallback behaviour. Requests are recorded for inspection.
#[derive(Debug)]
pub struct ScriptedConfirmer {
    answers: Mutex<VecDeque<Answer>>,
    approve_rest: bool,
    asked: Mutex<Vec<ConfirmRequest>>,
}

impl ScriptedConfirmer {
    /// Approves everything, typing the phrase when one is required.
    pub fn approving() -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            approve_rest: true,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn declining() -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            approve_rest: false,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn with_answers(mut self, answers: Vec<Answer>) -> Self {
        self.answers = Mutex::new(answers.into());
        self
    }

    pub fn asked(&self) -> Vec<ConfirmRequest> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&self, request: &ConfirmRequest) -> Answer {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(request.clone());
        }
        if let Some(answer) = self.answers.lock().ok().and_then(|mut a| a.pop_front()) {
            return answer;
        }
        match (self.approve_rest, request) {
            (true, ConfirmRequest::TypedPhrase { phrase, .. }) => Answer::Typed(phrase.to_string()),
            (true, _) => Answer::Yes,
            (false, _) => Answer::No,
        }
    }
}
