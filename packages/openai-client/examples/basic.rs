//! Basic OpenAI client usage example

use openai_client::{BatchLine, ChatRequest, Message, OpenAIClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize from environment
    let client = OpenAIClient::from_env()?;

    let request = ChatRequest::new("gpt-4o-mini")
        .message(Message::system("You are an annotation expert."))
        .message(Message::user("List the personal data in: We store your email for 30 days."))
        .temperature(0.0)
        .seed(10000)
        .max_tokens(200);

    // Simple chat completion
    println!("=== Chat Completion ===");
    let response = client.chat_completion(request.clone()).await?;
    println!("Response: {}", response.content);

    // Same request through the Batch API
    println!("\n=== Batch ===");
    let file_id = client
        .upload_batch_file("demo.jsonl", &[BatchLine::chat("request-0", request)])
        .await?;
    let batch = client.create_batch(&file_id, Default::default()).await?;
    println!("Submitted batch {} ({})", batch.id, batch.status);

    Ok(())
}
