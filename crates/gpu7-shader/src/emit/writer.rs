/// Line oriented source buffer. Lines end with `\r\n`.
#[derive(Debug, Default, Clone)]
pub(crate) struct ShaderWriter {
    out: String,
    indent: usize,
}

impl ShaderWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Writer whose lines start `levels` blocks deep.
    pub(crate) fn with_indent(levels: usize) -> Self {
        Self {
            out: String::new(),
            indent: levels * 2,
        }
    }

    pub(crate) fn indent(&mut self) {
        self.indent += 2;
    }

    pub(crate) fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(2);
    }

    pub(crate) fn line(&mut self, s: &str) {
        for _ in 0..self.indent {
            self.out.push(' ');
        }
        self.out.push_str(s);
        self.out.push_str("\r\n");
    }

    /// Writes `header {` and indents.
    pub(crate) fn open(&mut self, header: &str) {
        if header.is_empty() {
            self.line("{");
        } else {
            self.line(&format!("{header} {{"));
        }
        self.indent();
    }

    /// Dedents and writes `}` followed by `suffix`.
    pub(crate) fn close(&mut self, suffix: &str) {
        self.dedent();
        self.line(&format!("}}{suffix}"));
    }

    pub(crate) fn blank(&mut self) {
        self.out.push_str("\r\n");
    }

    /// Appends pre-rendered text verbatim.
    pub(crate) fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub(crate) fn len(&self) -> usize {
        self.out.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}
