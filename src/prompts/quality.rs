//! Quality rating prompts.
//!
//! Two variants: a query-only rating and a combined rating of a query
//! together with the response it received.

use super::render;

/// Rates a user query on clarity, specificity and coherence. Placeholder: `{input}`.
pub const INPUT_QUALITY_TEMPLATE: &str = r#"
# Role & Goal

    You are a meticulous Query Quality Analyst. Your goal is to score a user's query based on a rigorous, quantitative framework and provide a concise justification for your scoring.

# Scoring Criteria

    You must evaluate the user query against the following three criteria, each on a scale of 1 to 5 (where 1 is the worst and 5 is the best, and decimals are allowed).

    1.  **Clarity (1-5)**: How clear and grammatically correct is the query? Is the user's intent easily understandable without ambiguity?
        * 1-2: Very confusing, full of errors, intent is impossible to grasp.
        * 2.1-3: Moderately clear, but has some ambiguities or awkward phrasing.
        * 3.1-4: Mostly clear and well-phrased.
        * 4.1-5: Perfectly clear, concise, and grammatically flawless.

    2.  **Specificity (1-5)**: Does the query provide enough specific details, context, and constraints for an AI to generate a high-quality, relevant response?
        * 1-2: Extremely vague, lacks all necessary context or detail.
        * 2.1-3: Contains a general topic but misses key details, constraints, or format requirements.
        * 3.1-4: Reasonably specific, providing most of the necessary information.
        * 4.1-5: Highly specific, providing all necessary context, examples, constraints, and desired output format.

    3.  **Coherence (1-5)**: Are the different parts of the query logically connected? Does it represent a single, well-defined goal?
        * 1-2: Incoherent, contains contradictory requests or multiple unrelated questions.
        * 2.1-3: Mostly coherent, but parts of the query may not align perfectly.
        * 3.1-4: Coherent and focused on a single goal.
        * 4.1-5: Perfectly coherent, with all elements working together to define a precise task.

# User Query
    ```
    {input}
    ```

# Task & Output Format

    1.  **Analyze** the user query based on the criteria above.
    2.  **Provide a brief assessment** in the `input_quality_explanation` field, justifying your scores for each criterion.
    3.  **Calculate the final score** by taking the average of the three criteria scores, rounded to one decimal place. The final_score should be a float number between 1 and 5.
    4.  **Output the results** in the following JSON format. **DO NOT** output anything other than the JSON object.

    ```
    {
        "input_quality_explanation": "[Your brief analysis justifying the scores...]",
        "scores": {
        "clarity": "[1-5]",
        "specificity": "[1-5]",
        "coherence": "[1-5]"
        },
        "input_quality": "[1-5]"
    }
    ```
"#;

/// Rates both a user query and the AI response. Placeholders: `{query}`, `{response}`.
pub const COMBINED_QUALITY_TEMPLATE: &str = r#"
# Role & Goal

You are a highly analytical Conversation Quality Judge. Your mission is to conduct a comprehensive, quantitative audit of a full user-AI interaction. You must evaluate both the user's initial query and the AI's corresponding response with objectivity and precision, based on the established criteria.

# Interaction to Evaluate

## 1. User Input
{query}

## 2. AI Response
{response}

# Evaluation Framework

You will conduct two separate evaluations.

---

### **Part 1: Input Quality Evaluation**
Score the **User Input** on a 1-5 scale for each criterion:

* **Clarity (1-5)**: Is the language clear and unambiguous?
* **Specificity (1-5)**: Does it provide enough specific detail and context?
* **Coherence (1-5)**: Is the goal well-defined and internally consistent?

---

### **Part 2: Response Quality Evaluation**
Score the **AI Response** (in the context of the User Input) on a 1-5 scale for each criterion:

* **Accuracy (1-5)**: Is the information factually correct?
* **Completeness (1-5)**: Does it fully address all parts of the input?
* **Clarity (1-5)**: Is the response well-structured and easy to understand?
* **Helpfulness (1-5)**: How effectively does it help the user achieve their goal?

---

# Task & Output Format

1.  Perform the two evaluations based on the framework above.
2.  For each part, write a brief explanation justifying your scores.
3.  For each part, calculate a `final_score` by averaging its criteria scores (rounded to one decimal place).
4.  For each part, final_score should be a float number between 1 and 5.
5.  Combine both evaluations into a single JSON object as specified below. **You must only output this JSON object.**

```
{   
    "input_quality": "[1-5]",
    "response_quality": "[1-5]",
    "input_quality_explanation": "[Detailed explanation of input quality assessment...]",
    "response_quality_explanation": "[Detailed explanation of response quality assessment...]"
}
```
"#;

/// Build the query-only quality prompt.
pub fn build_input_quality_prompt(input: &str) -> String {
    render(INPUT_QUALITY_TEMPLATE, &[("input", input)])
}

/// Build the combined query/response quality prompt.
pub fn build_combined_quality_prompt(query: &str, response: &str) -> String {
    render(
        COMBINED_QUALITY_TEMPLATE,
        &[("query", query), ("response", response)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_quality_prompt_embeds_query() {
        let prompt = build_input_quality_prompt("How do I sort a list?");
        assert!(prompt.contains("How do I sort a list?"));
        assert!(prompt.contains("\"input_quality\""));
        assert!(!prompt.contains("{input}"));
    }

    #[test]
    fn test_combined_prompt_substitutes_once() {
        // A query that itself mentions a placeholder must not be expanded again.
        let prompt = build_combined_quality_prompt("explain {response}", "Sure.");
        assert!(prompt.contains("## 1. User Input\nexplain {response}\n"));
        assert!(prompt.contains("## 2. AI Response\nSure.\n"));
    }
}
