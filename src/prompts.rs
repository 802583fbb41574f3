/// System instruction sent with every request unless the config overrides it.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful, brilliant, and professional AI assistant. Provide concise yet comprehensive answers. Format your output with Markdown.";

/// Text placed on an assistant message whose stream failed.
pub const STREAM_ERROR_TEXT: &str =
    "Sorry, I encountered an error. Please check your connection or API key.";

/// Suggestions shown in an empty conversation.
pub const STARTER_PROMPTS: [&str; 4] = [
    "Explain quantum physics",
    "Write a Rust function",
    "Plan a travel itinerary",
    "Summarize latest news",
];
