//! Query difficulty prompt: intent, required knowledge and a 0-5 rating.

use super::render;

/// Placeholder: `{input}`.
pub const DIFFICULTY_TEMPLATE: &str = r#"
# Task: User Query Analysis

You are an expert query analyzer. Your task is to carefully analyze the given user query. The ultimate goal of this analysis is to route the query to the most appropriate specialist agent or knowledge base. You need to identify the user's intent, determine the required knowledge, and assess the query's difficulty.

## User Query
```

{input}

```
## Analysis Instructions:
1.  **Identify Intent**: Clearly describe what the user is trying to accomplish or what question they're asking. Look for both explicit requests and implied needs.
2.  **Determine Knowledge**: Pinpoint the specific domains, concepts, or information required to fully address the query. Be specific in your keywords.
3.  **Rate Difficulty**: Rate the query's difficulty on a scale of 0 to 5, based on the complexity of reasoning and the specificity of knowledge required. **You may use decimal values (e.g., 2.5, 3.7, etc.) to indicate intermediate difficulty levels.**
    * 0: Extremely simple, requires no specialized knowledge (e.g., "hello").
    * 1: Basic, requires minimal general knowledge (e.g., "what is the capital of France?").
    * 2: Straightforward, requires some common knowledge (e.g., "explain photosynthesis in simple terms").
    * 3: Moderate, requires solid domain knowledge (e.g., "how to implement a singleton pattern in Python?").
    * 4: Complex, requires advanced knowledge and reasoning (e.g., "compare the economic impacts of Keynesian vs. Austrian school theories").
    * 5: Expert-level, requires deep, specialized knowledge and complex reasoning (e.g., "devise a novel algorithm for protein folding prediction").
4.  **Handle Ambiguity**: If the query is too vague, ambiguous, or nonsensical to be analyzed, set the intent to "ambiguous query" and the difficulty to 3.0.

## Output Format
Given the user query, in your output, you first need to identify the user intent and the knowledge needed to solve the task in the user query.
Then, rate the difficulty level of the user query as a float number between 0 and 5 (decimals allowed).

Now, please output the user intent and difficulty level below in a JSON format by filling in the placeholders in []:

```
{   
    "intent": "The user wants to [....]",
    "knowledge": "To solve this problem, the models need to know [....]",
    "difficulty": "[0-5, float, decimals allowed]"
}
```

## Examples

### Example 1
**User Query**: "Can you tell me how to build a simple to-do list app using React and TypeScript? I need to know the basic components and state management."
**Output**:

{
    "intent": "The user wants a step-by-step guide or tutorial on creating a to-do list application using React with TypeScript, specifically asking for component structure and state management techniques.",
    "knowledge": "Requires knowledge of web development, specifically: React.js library, TypeScript language, front-end component architecture, and state management principles (e.g., useState, useReducer).",
    "difficulty": "3.0"
}


### Example 2

**User Query**: "what's the weather like in tokyo tomorrow"
**Output**:

{
    "intent": "The user is asking for the weather forecast for Tokyo for the next day.",
    "knowledge": "Requires access to real-time weather forecast data services and knowledge of the geographical location of Tokyo.",
    "difficulty": "0.5"
}

## Output Format & Constraints

Your response **MUST** be a single, valid JSON object and nothing else. Do not include any explanatory text before or after the JSON.

"#;

/// Build the difficulty analysis prompt for a query.
pub fn build_difficulty_prompt(input: &str) -> String {
    render(DIFFICULTY_TEMPLATE, &[("input", input)])
}
