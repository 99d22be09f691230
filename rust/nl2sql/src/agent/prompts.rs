use crate::{db::QueryResult, schema::Schema};
use std::fmt::Write as _;

pub fn relevance(query: &str, schema: &Schema) -> String {
    format!(
        "Determine if the following natural language query is related to the provided table schema. \
         Return 'true' if it is, and 'false' if it is not.\n\n\
         Table Schema (JSON):\n{}\n\n\
         Query:\n{}\n",
        schema.to_prompt_json(),
        query
    )
}

pub fn generation(query: &str, schema: &Schema, dialect: &str, rejected: &[&str]) -> String {
    let mut prompt = format!(
        "SQL Dialect: {}\n\n\
         System Prompt: SQL Table Structure (in JSON):\n{}\n\n\
         User Query:\n{}\n\n",
        dialect,
        schema.to_prompt_json(),
        query
    );

    if !rejected.is_empty() {
        prompt.push_str(
            "The following SQL queries were already proposed and judged incorrect. \
             Do not repeat them:\n",
        );
        for (idx, sql) in rejected.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}", idx + 1, sql);
        }
        prompt.push('\n');
    }

    prompt.push_str("Generate the corresponding SQL query:");
    prompt
}

pub fn verification(sql: &str, query: &str, schema: &Schema, dialect: &str) -> String {
    format!(
        "SQL Dialect: {}\n\n\
         Validate the following SQL query for correctness with respect to the provided natural \
         language query and table schema. Return 'true' if the query is correct, and 'false' if \
         it is not.\n\n\
         Table Schema (JSON):\n{}\n\n\
         Natural Language Query:\n{}\n\n\
         SQL Query:\n{}\n",
        dialect,
        schema.to_prompt_json(),
        query,
        sql
    )
}

pub fn explanation(query: &str, result: &QueryResult) -> String {
    let data = serde_json::to_string(&result.rows).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are an expert data interpreter. Based on the following query results, provide a \
         clear and detailed summary in bullet points. Include specific details and avoid \
         mentioning SQL or technical details.\n\n\
         Columns: {}.\n\
         Data: {}.\n\
         User Request: {}\n\n\
         Provide your summary in a bullet point list format:",
        result.columns.join(", "),
        data,
        query
    )
}
