//! Task classification prompt and the closed category set.

use super::render;

/// Categories a query may be assigned to. Anything else is mapped to
/// `"Others"`.
pub const TASK_CATEGORIES: [&str; 13] = [
    "Information seeking",
    "Reasoning",
    "Planning",
    "Editing",
    "Coding & Debugging",
    "Math",
    "Role playing",
    "Data analysis",
    "Creative writing",
    "Advice seeking",
    "Translation",
    "Brainstorming",
    "Others",
];

/// Fallback category for anything outside [`TASK_CATEGORIES`].
pub const FALLBACK_CATEGORY: &str = "Others";

/// Placeholder: `{input}`.
pub const CLASSIFICATION_TEMPLATE: &str = r#"
# IDENTITY AND GOAL
You are an expert AI assistant specializing in query analysis and task classification. Your goal is to accurately categorize a user's query based on their primary intent. This classification will be used to route the query to the most appropriate specialized agent.

# TASK DESCRIPTION
Analyze the user query provided in the `<query_to_classify>` block. Based on your analysis, you will assign a `primary_tag` and, if applicable, a list of `other_tags`.

- The `primary_tag` MUST represent the user's **main intent** or the **dominant action** required to fulfill the request.
- The `other_tags` list should include any secondary tasks or aspects present in the query.
- You MUST select tags exclusively from the `<available_tags>` list.
- Your final output MUST be a single, valid JSON object and nothing else.

# AVAILABLE TAGS
<available_tags>
[
    "Information seeking",      # Users ask for specific information or facts about various topics.
    "Reasoning",                # Queries require logical thinking, problem-solving, or processing of complex ideas.
    "Planning",                 # Users need assistance in creating plans or strategies for activities and projects.
    "Editing",                  # Involves editing, rephrasing, proofreading, or other tasks related to the composition of general written content.
    "Coding & Debugging",       # Users seek help with writing, reviewing, or fixing code in programming.
    "Math",                     # Queries related to mathematical concepts, problems, and calculations.
    "Role playing",             # Users engage in scenarios requiring the AI to adopt a character or persona.
    "Data analysis",            # Requests involve interpreting data, statistics, or performing analytical tasks.
    "Creative writing",         # Users seek assistance with crafting stories, poems, or other creative texts.
    "Advice seeking",           # Users ask for recommendations or guidance on various personal or professional issues.
    "Translation",              # Users ask for translation of text from one language to another.
    "Brainstorming",            # Involves generating ideas, creative thinking, or exploring possibilities.
    "Others"                    # Any queries that do not fit into the above categories or are of a miscellaneous nature.
]
</available_tags>

# EXAMPLES
<examples>
1.  **User Query**: "Help me plan a 4-day trip to Tokyo and find some good, cheap ramen spots."
    **Output**:
    ```json
    {
        "primary_tag": "Planning",
        "other_tags": ["Information seeking", "Advice seeking"]
    }
    ```

2.  **User Query**: "Can you write a python script to parse a CSV file and then explain how it works?"
    **Output**:
    ```json
    {
        "primary_tag": "Coding & Debugging",
        "other_tags": ["Information seeking"]
    }
    ```

3.  **User Query**: "Write a short, sad poem about autumn, then rephrase it to sound more hopeful."
    **Output**:
    ```json
    {
        "primary_tag": "Creative writing",
        "other_tags": ["Editing"]
    }
    ```
</examples>

# QUERY TO CLASSIFY
```
{input}
```

# OUTPUT
```
{

    "primary_tag": "<primary tag>",

    "other_tags": ["<tag 1>", "<tag 2>", ... ]

}
```
Please provide your response in the specified JSON format.
"#;

/// Build the classification prompt for a query.
pub fn build_classification_prompt(input: &str) -> String {
    render(CLASSIFICATION_TEMPLATE, &[("input", input)])
}

/// Whether `category` belongs to the closed category set.
pub fn is_task_category(category: &str) -> bool {
    TASK_CATEGORIES.contains(&category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_category_is_listed_in_prompt() {
        for category in TASK_CATEGORIES {
            assert!(
                CLASSIFICATION_TEMPLATE.contains(&format!("\"{category}\"")),
                "{category} missing from prompt"
            );
        }
    }

    #[test]
    fn test_is_task_category() {
        assert!(is_task_category("Math"));
        assert!(!is_task_category("math"));
        assert!(!is_task_category("Cooking"));
    }
}
