use serde::{Deserialize, Serialize};

use crate::predictions::ImageRef;

/// One entry of an edit session: either an instruction or an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
}

impl EditStep {
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            prompt: Some(text.into()),
            image: None,
        }
    }

    pub fn image(image: ImageRef) -> Self {
        Self {
            prompt: None,
            image: Some(image),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("nothing to undo at step {index} (history has {len} steps)")]
    UndoOutOfRange { index: usize, len: usize },
}

/// Linear edit history. Step 0 is the seed image and is never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditHistory {
    steps: Vec<EditStep>,
}

impl EditHistory {
    pub fn seeded(image: ImageRef) -> Self {
        Self {
            steps: vec![EditStep::image(image)],
        }
    }

    pub fn steps(&self) -> &[EditStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_first_prompt(&self) -> bool {
        self.steps.len() == 1
    }

    /// Image of the most recent step that carries one.
    pub fn current_image(&self) -> Option<&ImageRef> {
        self.steps.iter().rev().find_map(|step| step.image.as_ref())
    }

    pub fn push_prompt(&mut self, prompt: impl Into<String>) -> usize {
        self.steps.push(EditStep::prompt(prompt));
        self.steps.len() - 1
    }

    pub fn push_image(&mut self, image: ImageRef) -> usize {
        self.steps.push(EditStep::image(image));
        self.steps.len() - 1
    }

    /// Drop everything after `len`. Used to roll back an abandoned attempt.
    pub fn truncate(&mut self, len: usize) {
        self.steps.truncate(len.max(1));
    }

    /// Remove steps `index - 1` and `index`, returning the prompt that was at
    /// `index - 1` so it can be edited and resubmitted.
    pub fn undo(&mut self, index: usize) -> Result<Option<String>, HistoryError> {
        if index < 2 || index >= self.steps.len() {
            return Err(HistoryError::UndoOutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        let removed: Vec<EditStep> = self.steps.drain(index - 1..=index).collect();
        Ok(removed.into_iter().next().and_then(|step| step.prompt))
    }

    /// Back to the seed image.
    pub fn start_over(&mut self) {
        self.steps.truncate(1);
    }
}
