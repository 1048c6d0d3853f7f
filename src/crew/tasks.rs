use crate::task::TaskDefinition;

pub const RESEARCH_TASK: &str = "Market Research";
pub const ANALYSIS_TASK: &str = "Financial Data Analysis";
pub const WRITING_TASK: &str = "Investment Brief Drafting";
pub const REVIEW_TASK: &str = "Compliance Review";

pub fn research_task(topic: &str) -> TaskDefinition {
    TaskDefinition::new(
        RESEARCH_TASK,
        format!(
            "Conduct comprehensive research on the stock ticker **{topic}**. Gather the current \
             stock price, recent news drivers (last 7 days), and key financial figures from the \
             latest earnings report (Revenue, EPS, and forward guidance)."
        ),
        "A raw data report containing the ticker, current price, a list of 3-5 key news \
         headlines/summaries, and all relevant financial data points for the analyst to use.",
    )
}

pub fn analysis_task() -> TaskDefinition {
    TaskDefinition::new(
        ANALYSIS_TASK,
        "Analyze the raw data provided. Use the calculator tool to compute derived metrics like \
         the P/E ratio (if data is available), the change from the 52-week high, and a formal \
         investment recommendation score (1-10) with justification.",
        "A structured report containing all calculated metrics, a clear Bullish/Bearish/Neutral \
         stance, and the final numerical Recommendation Score (e.g., Score: 8/10, Stance: Bullish).",
    )
    .with_context([RESEARCH_TASK])
}

pub fn writing_task() -> TaskDefinition {
    TaskDefinition::new(
        WRITING_TASK,
        "Draft a professional Investment Brief based on the Data Analyst's structured report. The \
         brief must include sections for 'Executive Summary', 'Key Metrics & Analysis' (using the \
         calculated metrics), and 'Recent Market Drivers' (incorporating the researcher's news). \
         Maintain a formal, professional tone.",
        "A complete, professional Markdown-formatted Investment Brief ready for compliance review.",
    )
    .with_context([ANALYSIS_TASK])
}

pub fn review_task() -> TaskDefinition {
    TaskDefinition::new(
        REVIEW_TASK,
        "Review the drafted Investment Brief for accuracy, compliance risk, and quality. You MUST \
         use the calculator tool to double-check all presented financial metrics against the \
         initial raw data. Identify any non-compliant language (e.g., guarantees, speculation) \
         and factual errors.",
        "A review report with sections for Summary, Major Findings, Minor Suggestions, and a Final \
         Recommendation: either 'SIGN-OFF: Approved' or an 'Actionable Critique' listing required \
         revisions.",
    )
    .with_context([WRITING_TASK])
}

/// The four stages in run order; each takes the previous stage's output.
pub fn finance_task_definitions(topic: &str) -> [TaskDefinition; 4] {
    [
        research_task(topic),
        analysis_task(),
        writing_task(),
        review_task(),
    ]
}
