//! The write / review / refactor code generation pipeline.

use super::{CompletionClient, PromptStage};
use crate::errors::PipelineValidationError;
use crate::pipeline::{Pipeline, PipelineBuilder};
use std::sync::Arc;

/// Instructions for the `write` stage.
pub const WRITE_PROMPT: &str = "You are a Code Writer AI.
Based on the user's request, write the initial code.
Output *only* the raw code block.

Request:
{input}";

/// Instructions for the `review` stage.
pub const REVIEW_PROMPT: &str = "You are a Code Reviewer AI.

Review the code below.

```
{generated_code}
```

Provide constructive feedback on potential errors, style issues, or improvements.
Focus on clarity and correctness.
Output only the review comments.";

/// Instructions for the `refactor` stage.
pub const REFACTOR_PROMPT: &str = "You are a Code Refactorer AI.

Below is the original code:

```
{generated_code}
```

Below are the review comments:

{review_comments}

Refactor the code based on the provided feedback.

Output *only* the final, refactored code block.";

/// Builds the three-stage code pipeline over `client`.
///
/// Stages `write`, `review` and `refactor` populate `generated_code`,
/// `review_comments` and `refactored_code`.
///
/// # Errors
///
/// Returns a validation error only if the prompts reference keys that no
/// earlier stage produces.
pub fn code_generation_pipeline(
    client: Arc<dyn CompletionClient>,
    model: Option<&str>,
) -> Result<Pipeline, PipelineValidationError> {
    let stage = |prompt: &str| {
        let stage = PromptStage::new(prompt, Arc::clone(&client));
        match model {
            Some(model) => stage.with_model(model),
            None => stage,
        }
    };

    let mut builder = PipelineBuilder::new("code_generation");
    builder.add_stage_spec(stage(WRITE_PROMPT).into_spec("write", "generated_code"))?;
    builder.add_stage_spec(stage(REVIEW_PROMPT).into_spec("review", "review_comments"))?;
    builder.add_stage_spec(stage(REFACTOR_PROMPT).into_spec("refactor", "refactored_code"))?;
    builder.build()
}
