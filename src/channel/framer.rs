//! Prompt-delimited framing of `ipmitool shell` output.
//!
//! Every command is written followed by an empty line. The shell echoes the
//! command after its prompt, prints the output, then prints a second prompt
//! for the empty line. That second prompt closes the block, even for
//! commands that print nothing:
//!
//! ```text
//! ipmitool> sdr entity 193.101
//! 12 V PP | 12.3 | ok | 193.101 | 12.05 Volts
//! ipmitool>
//! ```

/// Splits a stream of output lines into per-command blocks.
#[derive(Debug)]
pub struct ResponseFramer {
    prompt: String,
    started: bool,
    lines: Vec<String>,
}

impl ResponseFramer {
    pub fn new(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            started: false,
            lines: Vec::new(),
        }
    }

    /// Feed one line. Returns the finished block when this line closes it.
    pub fn push(&mut self, line: String) -> Option<Vec<String>> {
        let is_prompt = line.contains(&self.prompt);
        self.lines.push(line);

        if !is_prompt {
            return None;
        }
        if self.started {
            self.started = false;
            return Some(std::mem::take(&mut self.lines));
        }
        self.started = true;
        None
    }
}

/// Extract the command output from a framed block: everything after the
/// echoed command line, up to the closing prompt.
pub fn extract_response(block: &[String], prompt: &str) -> String {
    let mut out = String::new();
    for line in block
        .iter()
        .skip_while(|l| !l.contains(prompt))
        .skip(1)
        .take_while(|l| !l.contains(prompt))
    {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Render command tokens as one shell input line. Tokens containing
/// whitespace are quoted so `sensor get "12 V PP"` stays one argument.
pub fn command_line(tokens: &[&str]) -> String {
    tokens
        .iter()
        .map(|t| {
            if t.chars().any(char::is_whitespace) {
                format!("\"{}\"", t)
            } else {
                t.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SHELL_PROMPT;

    fn feed(framer: &mut ResponseFramer, text: &str) -> Vec<Vec<String>> {
        text.lines()
            .filter_map(|l| framer.push(l.to_string()))
            .collect()
    }

    #[test]
    fn test_block_closes_on_second_prompt() {
        let mut framer = ResponseFramer::new(SHELL_PROMPT);
        let blocks = feed(
            &mut framer,
            "ipmitool> sdr entity 193.101\n\
             12 V PP | 12.3 | ok | 193.101 | 12.05 Volts\n\
             Inlet | 40h | ok | 193.101 | 31 degrees C\n\
             ipmitool> \n",
        );
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            extract_response(&blocks[0], SHELL_PROMPT),
            "12 V PP | 12.3 | ok | 193.101 | 12.05 Volts\nInlet | 40h | ok | 193.101 | 31 degrees C\n"
        );
    }

    #[test]
    fn test_empty_output_still_completes() {
        let mut framer = ResponseFramer::new(SHELL_PROMPT);
        let blocks = feed(&mut framer, "ipmitool> raw 0x06 0x03\nipmitool> \n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(extract_response(&blocks[0], SHELL_PROMPT), "");
    }

    #[test]
    fn test_consecutive_commands_frame_separately() {
        let mut framer = ResponseFramer::new(SHELL_PROMPT);
        let blocks = feed(
            &mut framer,
            "ipmitool> mc info\nDevice ID : 3\nipmitool> \n\
             ipmitool> sel time get\n01/02/1970 03:04:05\nipmitool> \n",
        );
        assert_eq!(blocks.len(), 2);
        assert_eq!(extract_response(&blocks[0], SHELL_PROMPT), "Device ID : 3\n");
        assert_eq!(extract_response(&blocks[1], SHELL_PROMPT), "01/02/1970 03:04:05\n");
    }

    #[test]
    fn test_partial_block_is_held() {
        let mut framer = ResponseFramer::new(SHELL_PROMPT);
        assert!(feed(&mut framer, "ipmitool> fru print 3\nProduct Extra : x\n").is_empty());
        let blocks = feed(&mut framer, "ipmitool> \n");
        assert_eq!(extract_response(&blocks[0], SHELL_PROMPT), "Product Extra : x\n");
    }

    #[test]
    fn test_noise_before_echo_is_dropped() {
        let block: Vec<String> = ["banner", "ipmitool> mc info", "Device ID : 3", "ipmitool> "]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(extract_response(&block, SHELL_PROMPT), "Device ID : 3\n");
    }

    #[test]
    fn test_command_line_quotes_labels() {
        assert_eq!(command_line(&["sensor", "get", "12 V PP"]), "sensor get \"12 V PP\"");
        assert_eq!(command_line(&["sdr", "entity", "193.101"]), "sdr entity 193.101");
    }
}
